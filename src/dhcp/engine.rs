//! Lease decision procedures.
//!
//! Two entry points, one per DHCP question:
//!
//! - [`find_lease`] answers DHCPREQUEST: the client claims an address;
//!   confirm it, renew it, or NAK.
//! - [`find_or_create_lease`] answers DHCPDISCOVER: find the client an
//!   address, preferring its reservation, falling back to subnet
//!   allocation.
//!
//! Return conventions: a lease means respond positively, a
//! [`LeaseNak`] means NAK explicitly, and no lease with no error means
//! stay silent.
//!
//! Because lease identity (strategy, token) is immutable once created,
//! the engine takes over an existing lease by removing it and creating
//! a fresh one at the same address under the one lock set it holds.

use super::{hexaddr, is_global_unicast, LeaseNak};
use crate::models::{prefix, Entity, Lease, Reservation, Subnet};
use crate::tracker::locks::LockedStores;
use crate::tracker::DataTracker;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Prefixes both entry points lock. Lease persistence validates
/// coverage against subnets and reservations, so the whole set rides
/// along even for DHCPREQUEST.
const LOCKS: [&str; 3] = [prefix::LEASES, prefix::RESERVATIONS, prefix::SUBNETS];

/// Handle a DHCPREQUEST: the client asks to use (or keep) `req`.
pub fn find_lease(
    dt: &DataTracker,
    strat: &str,
    token: &str,
    req: Option<Ipv4Addr>,
) -> Result<Option<Lease>, LeaseNak> {
    let mut d = dt.lock(&LOCKS);

    let req = match req.filter(|r| is_global_unicast(*r)) {
        Some(r) => r,
        None => return Err(LeaseNak("no requested address".to_string())),
    };
    let hexreq = hexaddr(req);

    let lease = match d
        .store(prefix::LEASES)
        .find(&hexreq)
        .and_then(|e| e.as_lease())
        .cloned()
    {
        Some(l) => l,
        None => return Err(LeaseNak(format!("No lease for {hexreq} exists"))),
    };
    if !lease.expired() && !lease.owned_by(strat, token) {
        return Err(LeaseNak(format!(
            "Lease for {hexreq} owned by {}:{}",
            lease.strategy, lease.token
        )));
    }

    // A conflicting reservation evicts the current holder.
    if let Some(rsv) = d
        .store(prefix::RESERVATIONS)
        .find(&hexreq)
        .and_then(|e| e.as_reservation())
        .cloned()
    {
        if rsv.strategy != lease.strategy || rsv.token != lease.token {
            let mut invalid = lease;
            invalid.invalidate();
            persist(dt, &mut d, invalid).map_err(LeaseNak)?;
            return Err(LeaseNak(format!(
                "Reservation {} ({}:{}) conflicts with {}:{}",
                rsv.addr, rsv.strategy, rsv.token, strat, token
            )));
        }
    }

    // The lease is the client's. Figure out how long it gets to keep
    // it: the covering subnet decides; a bare reservation grants two
    // hours; an orphaned lease dies here.
    let expire = if let Some(span) = subnet_covering(&d, req).map(|s| s.lease_time_for(req)) {
        Utc::now() + span
    } else if d.store(prefix::RESERVATIONS).find(&hexreq).is_some() {
        Utc::now() + Duration::hours(2)
    } else {
        dt.remove(&mut d, &Entity::Lease(lease))
            .map_err(|e| LeaseNak(e.to_string()))?;
        return Err(LeaseNak(format!(
            "Lease {req} has no reservation or subnet, it is dead to us"
        )));
    };

    let mut renewed = lease_at(req, strat, token);
    renewed.expire_time = expire;
    sweep_other_leases(dt, &mut d, strat, token, req);
    let saved = persist(dt, &mut d, renewed).map_err(LeaseNak)?;
    Ok(Some(saved))
}

/// Handle a DHCPDISCOVER: find or create a lease for the client.
pub fn find_or_create_lease(
    dt: &DataTracker,
    strat: &str,
    token: &str,
    req: Option<Ipv4Addr>,
    via: &[Ipv4Addr],
) -> Option<Lease> {
    let mut d = dt.lock(&LOCKS);

    let addr = via_reservation(&d, strat, token, req)
        .or_else(|| via_subnet(&d, strat, token, req, via))?;

    // One active lease per client identity.
    sweep_other_leases(dt, &mut d, strat, token, addr);

    // A short fuse until the client comes back with a DHCPREQUEST.
    let mut lease = lease_at(addr, strat, token);
    lease.expire_time = Utc::now() + Duration::minutes(1);
    match persist(dt, &mut d, lease) {
        Ok(l) => Some(l),
        Err(err) => {
            tracing::warn!(addr = %addr, strategy = strat, token, error = %err, "failed to persist offered lease");
            None
        }
    }
}

/// Reservation-first resolution. Returns the address to offer, if the
/// client's reservation settles the question.
fn via_reservation(
    d: &LockedStores<'_>,
    strat: &str,
    token: &str,
    req: Option<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    let reservations = d.store(prefix::RESERVATIONS);
    let rsv: Reservation = match req.filter(|r| is_global_unicast(*r)) {
        Some(r) => {
            let rsv = reservations
                .find(&hexaddr(r))
                .and_then(|e| e.as_reservation())?;
            if rsv.token != token || rsv.strategy != strat {
                return None;
            }
            rsv.clone()
        }
        None => reservations
            .items()
            .iter()
            .filter_map(|e| e.as_reservation())
            .find(|r| r.token == token && r.strategy == strat)?
            .clone(),
    };

    match d
        .store(prefix::LEASES)
        .find(&rsv.key())
        .and_then(|e| e.as_lease())
    {
        // Our lease, or one we can take over. Either way the
        // reservation's address is the answer.
        Some(l) if l.owned_by(strat, token) || l.expired() => Some(rsv.addr),
        // Someone else still actively holds it; the subnet path gets
        // to find an interim address.
        Some(_) => None,
        // Nothing leased there yet.
        None => Some(rsv.addr),
    }
}

/// Subnet allocation for clients without a usable reservation.
fn via_subnet(
    d: &LockedStores<'_>,
    strat: &str,
    token: &str,
    req: Option<Ipv4Addr>,
    via: &[Ipv4Addr],
) -> Option<Ipv4Addr> {
    // Without a relay address there is no way to pick a subnet, and
    // silence is the only sane answer.
    let gw = via.iter().copied().find(|v| is_global_unicast(*v))?;
    let subnet: Subnet = d
        .store(prefix::SUBNETS)
        .items()
        .iter()
        .filter_map(|e| e.as_subnet())
        .find(|s| s.subnet_contains(gw) && s.strategy == strat)?
        .clone();

    let (lo, hi) = subnet.active_bounds()?;
    let curr_leases: Vec<Lease> = d
        .store(prefix::LEASES)
        .subset(&lo, &hi)
        .into_iter()
        .filter_map(Entity::into_lease)
        .collect();
    let curr_reservations: Vec<Reservation> = d
        .store(prefix::RESERVATIONS)
        .subset(&lo, &hi)
        .into_iter()
        .filter_map(Entity::into_reservation)
        .collect();

    let mut used: HashSet<String> = HashSet::new();
    let mut reserved: HashSet<String> = HashSet::new();
    for l in &curr_leases {
        used.insert(l.key());
    }
    for r in &curr_reservations {
        used.insert(r.key());
        reserved.insert(r.key());
    }

    // Reuse the client's own lease in this subnet if it has one,
    // unless a reservation for this identity exists; reservation
    // handling already gave the authoritative answer then.
    let has_reservation = curr_reservations
        .iter()
        .any(|r| r.token == token && r.strategy == strat);
    if !has_reservation {
        if let Some(mine) = curr_leases
            .iter()
            .find(|l| l.owned_by(strat, token) && req.map(|r| l.addr == r).unwrap_or(true))
        {
            return Some(mine.addr);
        }
    }

    // An explicit request for an address in our range gets honored if
    // the address is free, ours, or expired and unreserved.
    if let Some(r) = req {
        if subnet.in_active_range(r) {
            let hex = hexaddr(r);
            if !used.contains(&hex) {
                return Some(r);
            }
            if !reserved.contains(&hex) {
                if let Some(l) = curr_leases.iter().find(|l| l.key() == hex) {
                    if l.owned_by(strat, token) || l.expired() {
                        return Some(r);
                    }
                }
            }
            // Actively held by someone else; allocate elsewhere.
        }
    }

    let (addr, fallback) = subnet.next_free(&used);
    if let Some(a) = addr {
        return Some(a);
    }
    if !fallback {
        return None;
    }

    // All addresses taken: steal the most expired lease that has no
    // reservation backing it.
    let mut by_expiry = curr_leases;
    by_expiry.sort_by_key(|l| l.expire_time);
    for l in &by_expiry {
        if !l.expired() {
            break;
        }
        if !reserved.contains(&l.key()) {
            return Some(l.addr);
        }
    }
    None
}

fn lease_at(addr: Ipv4Addr, strat: &str, token: &str) -> Lease {
    Lease {
        addr,
        strategy: strat.to_string(),
        token: token.to_string(),
        ..Default::default()
    }
}

/// Find the subnet whose network contains `addr`.
fn subnet_covering(d: &LockedStores<'_>, addr: Ipv4Addr) -> Option<Subnet> {
    d.store(prefix::SUBNETS)
        .items()
        .iter()
        .filter_map(|e| e.as_subnet())
        .find(|s| s.subnet_contains(addr))
        .cloned()
}

/// Remove every other lease held by this client identity.
fn sweep_other_leases(
    dt: &DataTracker,
    d: &mut LockedStores<'_>,
    strat: &str,
    token: &str,
    keep: Ipv4Addr,
) {
    let stale: Vec<Entity> = d
        .store(prefix::LEASES)
        .items()
        .iter()
        .filter(|e| {
            e.as_lease()
                .map(|l| l.owned_by(strat, token) && l.addr != keep)
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    for ent in stale {
        if let Err(err) = dt.remove(d, &ent) {
            tracing::warn!(key = %ent.key(), error = %err, "failed to remove superseded lease");
        }
    }
}

/// Save a lease, removing any existing lease at the same address first
/// when its identity differs (identity is immutable per lease object).
fn persist(
    dt: &DataTracker,
    d: &mut LockedStores<'_>,
    lease: Lease,
) -> Result<Lease, String> {
    let key = lease.key();
    if let Some(old) = d.store(prefix::LEASES).find(&key).cloned() {
        let same_identity = old
            .as_lease()
            .map(|o| o.owned_by(&lease.strategy, &lease.token))
            .unwrap_or(false);
        if !same_identity {
            dt.remove(d, &old).map_err(|e| e.to_string())?;
        }
    }
    match dt.save(d, Entity::Lease(lease)) {
        Ok(Entity::Lease(l)) => Ok(l),
        Ok(other) => Err(format!("lease save returned a {}", other.prefix())),
        Err(e) => Err(e.to_string()),
    }
}
