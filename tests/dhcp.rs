//! DHCP lease engine scenarios.

mod common;

use anvil::dhcp::engine::{find_lease, find_or_create_lease};
use anvil::models::{prefix, Entity};
use chrono::Utc;
use common::*;
use std::net::Ipv4Addr;

fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 124, last)
}

fn lease_at(dt: &anvil::tracker::DataTracker, addr: Ipv4Addr) -> Option<anvil::models::Lease> {
    let d = dt.lock(&[prefix::LEASES]);
    d.store(prefix::LEASES)
        .find(&anvil::dhcp::hexaddr(addr))
        .and_then(|e| e.as_lease())
        .cloned()
}

// ============================================================================
// FindLease (DHCPREQUEST)
// ============================================================================

#[test]
fn request_without_an_address_is_nakked() {
    let dt = mk_tracker();
    assert!(find_lease(&dt, "mac", "aa", None).is_err());
    assert!(find_lease(&dt, "mac", "aa", Some(Ipv4Addr::new(127, 0, 0, 1))).is_err());
}

#[test]
fn request_for_an_unleased_address_is_nakked() {
    let dt = mk_tracker();
    let err = find_lease(&dt, "mac", "aa", Some(ip(10))).unwrap_err();
    assert!(err.to_string().contains("No lease"));
}

#[test]
fn request_for_someone_elses_active_lease_is_nakked() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(10), "mac", "bb", fresh())))
            .unwrap();
    }
    let err = find_lease(&dt, "mac", "aa", Some(ip(10))).unwrap_err();
    assert!(err.to_string().contains("owned by"));
}

#[test]
fn renewal_gets_the_subnet_lease_time() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(100), "mac", "aa", fresh())))
            .unwrap();
    }
    let renewed = find_lease(&dt, "mac", "aa", Some(ip(100)))
        .unwrap()
        .unwrap();
    // Active range lease: 60 seconds from the subnet.
    let remaining = renewed.expire_time - Utc::now();
    assert!(remaining.num_seconds() > 30 && remaining.num_seconds() <= 60);
}

#[test]
fn reservation_backed_lease_outside_a_subnet_gets_two_hours() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Reservation(reservation(ip(10), "mac", "aa")))
            .unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(10), "mac", "aa", fresh())))
            .unwrap();
    }
    let renewed = find_lease(&dt, "mac", "aa", Some(ip(10))).unwrap().unwrap();
    let remaining = renewed.expire_time - Utc::now();
    assert!(remaining.num_minutes() > 115 && remaining.num_minutes() <= 120);
}

#[test]
fn orphaned_lease_is_removed_and_nakked() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(10), "mac", "aa", fresh())))
            .unwrap();
        let subnet = dt.fetch_one(&d, prefix::SUBNETS, "test").unwrap();
        dt.remove(&mut d, &subnet).unwrap();
    }
    let err = find_lease(&dt, "mac", "aa", Some(ip(10))).unwrap_err();
    assert!(err.to_string().contains("dead to us"));
    assert!(lease_at(&dt, ip(10)).is_none());
}

/// Scenario: a reservation for one client conflicts with another
/// client's unexpired lease at the same address. The holder gets
/// NAKed and invalidated; the reservation owner then gets the address.
#[test]
fn lease_takeover_via_reservation_conflict() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(10), "mac", "bb", fresh())))
            .unwrap();
        dt.create(&mut d, Entity::Reservation(reservation(ip(10), "mac", "aa")))
            .unwrap();
    }

    let err = find_lease(&dt, "mac", "bb", Some(ip(10))).unwrap_err();
    assert!(err.to_string().contains("conflicts with"));
    assert!(lease_at(&dt, ip(10)).unwrap().expired());

    let offered = find_or_create_lease(&dt, "mac", "aa", None, &[]).unwrap();
    assert_eq!(offered.addr, ip(10));
    assert!(!offered.expired());
    assert!(offered.owned_by("mac", "aa"));
}

// ============================================================================
// FindOrCreateLease (DHCPDISCOVER)
// ============================================================================

#[test]
fn discover_without_via_or_reservation_stays_silent() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
    }
    assert!(find_or_create_lease(&dt, "mac", "aa", None, &[]).is_none());
    // A loopback relay cannot pick a subnet either.
    assert!(
        find_or_create_lease(&dt, "mac", "aa", None, &[Ipv4Addr::new(127, 0, 0, 1)]).is_none()
    );
}

#[test]
fn discover_allocates_from_the_subnet_active_range() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
    }
    let offered = find_or_create_lease(&dt, "mac", "aa", None, &[ip(1)]).unwrap();
    assert_eq!(offered.addr, ip(80));

    // A second client gets the next free address.
    let offered = find_or_create_lease(&dt, "mac", "bb", None, &[ip(1)]).unwrap();
    assert_eq!(offered.addr, ip(81));
}

/// Scenario: re-discovering with a requested address moves the client
/// and removes its earlier lease.
#[test]
fn one_lease_per_identity() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
    }
    let first = find_or_create_lease(&dt, "mac", "aa", None, &[ip(1)]).unwrap();
    assert_eq!(first.addr, ip(80));

    let moved = find_or_create_lease(&dt, "mac", "aa", Some(ip(100)), &[ip(1)]).unwrap();
    assert_eq!(moved.addr, ip(100));
    assert!(lease_at(&dt, ip(80)).is_none());
    assert!(lease_at(&dt, ip(100)).is_some());
}

#[test]
fn discover_prefers_the_clients_reservation() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
        dt.create(&mut d, Entity::Reservation(reservation(ip(10), "mac", "aa")))
            .unwrap();
    }
    let offered = find_or_create_lease(&dt, "mac", "aa", None, &[ip(1)]).unwrap();
    assert_eq!(offered.addr, ip(10));
}

#[test]
fn active_foreign_lease_on_reserved_address_falls_back_to_subnet() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
        dt.create(&mut d, Entity::Reservation(reservation(ip(10), "mac", "aa")))
            .unwrap();
        // Someone else is still actively squatting the reserved address.
        dt.create(&mut d, Entity::Lease(lease(ip(10), "mac", "bb", fresh())))
            .unwrap();
    }
    let offered = find_or_create_lease(&dt, "mac", "aa", None, &[ip(1)]).unwrap();
    assert_eq!(offered.addr, ip(80));
}

#[test]
fn strategy_mismatch_means_no_subnet() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("token"))).unwrap();
    }
    assert!(find_or_create_lease(&dt, "mac", "aa", None, &[ip(1)]).is_none());
}

#[test]
fn only_reservations_subnet_never_allocates() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        let mut s = subnet_124("mac");
        s.only_reservations = true;
        s.active_start = None;
        s.active_end = None;
        s.active_lease_time = 0;
        dt.create(&mut d, Entity::Subnet(s)).unwrap();
    }
    assert!(find_or_create_lease(&dt, "mac", "aa", None, &[ip(1)]).is_none());
}

#[test]
fn exhausted_range_steals_the_most_expired_unreserved_lease() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        let mut s = subnet_124("mac");
        s.active_end = Some(ip(82));
        dt.create(&mut d, Entity::Subnet(s)).unwrap();
        // .80 is reserved for its expired holder; .81 expired longer
        // ago than .82.
        dt.create(&mut d, Entity::Reservation(reservation(ip(80), "mac", "r1")))
            .unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(80), "mac", "r1", expired())))
            .unwrap();
        dt.create(
            &mut d,
            Entity::Lease(lease(ip(81), "mac", "old", expired() - chrono::Duration::minutes(30))),
        )
        .unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(82), "mac", "older", expired())))
            .unwrap();
    }
    let offered = find_or_create_lease(&dt, "mac", "new", None, &[ip(1)]).unwrap();
    assert_eq!(offered.addr, ip(81));
    assert!(offered.owned_by("mac", "new"));
}

#[test]
fn full_range_of_active_leases_stays_silent() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        let mut s = subnet_124("mac");
        s.active_end = Some(ip(81));
        dt.create(&mut d, Entity::Subnet(s)).unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(80), "mac", "h1", fresh())))
            .unwrap();
        dt.create(&mut d, Entity::Lease(lease(ip(81), "mac", "h2", fresh())))
            .unwrap();
    }
    assert!(find_or_create_lease(&dt, "mac", "new", None, &[ip(1)]).is_none());
}

#[test]
fn discover_renews_the_clients_existing_lease() {
    let dt = mk_tracker();
    {
        let mut d = dt.lock_all();
        dt.create(&mut d, Entity::Subnet(subnet_124("mac"))).unwrap();
    }
    let first = find_or_create_lease(&dt, "mac", "aa", None, &[ip(1)]).unwrap();
    let again = find_or_create_lease(&dt, "mac", "aa", None, &[ip(1)]).unwrap();
    assert_eq!(first.addr, again.addr);

    let d = dt.lock(&[prefix::LEASES]);
    let held: Vec<_> = d
        .store(prefix::LEASES)
        .items()
        .iter()
        .filter_map(|e| e.as_lease())
        .filter(|l| l.owned_by("mac", "aa"))
        .collect();
    assert_eq!(held.len(), 1);
}
