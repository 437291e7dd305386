//! DHCP leases.
//!
//! A lease is the live binding of an address to a (strategy, token)
//! client identity, with an expiry. Like reservations, the identity is
//! immutable through the API; only the DHCP engine rewrites it, and it
//! does so by going through the same save path with a fresh object.

use super::{prefix, validate_ip4, Validation};
use crate::core::error::ModelError;
use crate::dhcp::hexaddr;
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A live address binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Lease {
    #[serde(flatten)]
    pub validation: Validation,
    /// The leased address; also the key, hex-encoded.
    pub addr: Ipv4Addr,
    /// Client identity under the strategy.
    pub token: String,
    /// Leasing strategy the token belongs to.
    pub strategy: String,
    /// When the lease stops being valid.
    pub expire_time: DateTime<Utc>,
}

impl Default for Lease {
    fn default() -> Self {
        Self {
            validation: Validation::default(),
            addr: Ipv4Addr::UNSPECIFIED,
            token: String::new(),
            strategy: String::new(),
            expire_time: DateTime::UNIX_EPOCH,
        }
    }
}

impl Lease {
    pub fn key(&self) -> String {
        hexaddr(self.addr)
    }

    /// Whether the lease has expired.
    pub fn expired(&self) -> bool {
        self.expire_time <= Utc::now()
    }

    /// Force the lease into the past so the next request renegotiates.
    pub fn invalidate(&mut self) {
        self.expire_time = DateTime::UNIX_EPOCH;
    }

    /// Whether this lease belongs to the given client identity.
    pub fn owned_by(&self, strategy: &str, token: &str) -> bool {
        self.strategy == strategy && self.token == token
    }
}

pub static INDEXES: [Index; 4] = [
    Index {
        name: "Addr",
        kind: "IP Address",
        unique: true,
        key_of: |e| IndexValue::Ip(e.as_lease().map(|l| u32::from(l.addr)).unwrap_or(0)),
        parse: index::parse_ip,
    },
    Index {
        name: "Token",
        kind: "string",
        unique: false,
        key_of: |e| IndexValue::Str(e.as_lease().map(|l| l.token.clone()).unwrap_or_default()),
        parse: index::parse_str,
    },
    Index {
        name: "Strategy",
        kind: "string",
        unique: false,
        key_of: |e| {
            IndexValue::Str(e.as_lease().map(|l| l.strategy.clone()).unwrap_or_default())
        },
        parse: index::parse_str,
    },
    Index {
        name: "ExpireTime",
        kind: "dateTime",
        unique: false,
        key_of: |e| {
            IndexValue::Time(
                e.as_lease()
                    .map(|l| l.expire_time)
                    .unwrap_or(DateTime::UNIX_EPOCH),
            )
        },
        parse: index::parse_time,
    },
];

pub(crate) fn on_change(old: &Lease, new: &Lease) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::LEASES, &new.key());
    if new.token != old.token {
        e.errorf("Token cannot change");
    }
    if new.strategy != old.strategy {
        e.errorf("Strategy cannot change");
    }
    e.or_ok()
}

pub(crate) fn before_save(l: &mut Lease, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::LEASES, &l.key());
    validate_ip4(&mut e, "Addr", l.addr);
    if l.token.is_empty() {
        e.errorf("Lease Token cannot be empty");
    }
    if l.strategy.is_empty() {
        e.errorf("Lease Strategy cannot be empty");
    }

    // One active lease per client identity.
    for ent in d.store(prefix::LEASES).items() {
        if let Some(other) = ent.as_lease() {
            if other.addr == l.addr {
                continue;
            }
            if other.owned_by(&l.strategy, &l.token) {
                e.errorf(format!(
                    "Lease {} already has Strategy {}: Token {}",
                    other.key(),
                    l.strategy,
                    l.token
                ));
                break;
            }
        }
    }

    // A lease has to be backed by something we manage: a subnet whose
    // network contains it, or a reservation at its address.
    let covered_by_subnet = d
        .store(prefix::SUBNETS)
        .items()
        .iter()
        .filter_map(|ent| ent.as_subnet())
        .any(|s| s.in_subnet_range(l.addr));
    let covered_by_reservation = d.store(prefix::RESERVATIONS).find(&l.key()).is_some();
    if !covered_by_subnet && !covered_by_reservation {
        e.errorf(format!(
            "Lease {} is not in any subnet range and has no reservation",
            l.addr
        ));
    }

    if !e.contains_error() {
        l.validation.finish(&e);
    }
    e.or_ok()
}
