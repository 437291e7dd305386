//! DHCP reservations.
//!
//! A reservation pins an address to a (strategy, token) client
//! identity. Both sides of the binding are immutable once created;
//! changing either means delete and re-create.

use super::{prefix, validate_ip4, validate_maybe_ip4, DhcpOption, Validation};
use crate::core::error::ModelError;
use crate::dhcp::hexaddr;
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A permanent address assignment for one client identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Reservation {
    #[serde(flatten)]
    pub validation: Validation,
    /// The reserved address; also the key, hex-encoded.
    pub addr: Ipv4Addr,
    /// Client identity under the strategy. Immutable.
    pub token: String,
    /// Leasing strategy the token belongs to. Immutable.
    pub strategy: String,
    /// Boot server override for this reservation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_server: Option<Ipv4Addr>,
    /// DHCP options specific to this reservation.
    pub options: Vec<DhcpOption>,
}

impl Default for Reservation {
    fn default() -> Self {
        Self {
            validation: Validation::default(),
            addr: Ipv4Addr::UNSPECIFIED,
            token: String::new(),
            strategy: String::new(),
            next_server: None,
            options: Vec::new(),
        }
    }
}

impl Reservation {
    pub fn key(&self) -> String {
        hexaddr(self.addr)
    }
}

pub static INDEXES: [Index; 3] = [
    Index {
        name: "Addr",
        kind: "IP Address",
        unique: true,
        key_of: |e| {
            IndexValue::Ip(
                e.as_reservation()
                    .map(|r| u32::from(r.addr))
                    .unwrap_or(0),
            )
        },
        parse: index::parse_ip,
    },
    Index {
        name: "Token",
        kind: "string",
        unique: false,
        key_of: |e| {
            IndexValue::Str(
                e.as_reservation()
                    .map(|r| r.token.clone())
                    .unwrap_or_default(),
            )
        },
        parse: index::parse_str,
    },
    Index {
        name: "Strategy",
        kind: "string",
        unique: false,
        key_of: |e| {
            IndexValue::Str(
                e.as_reservation()
                    .map(|r| r.strategy.clone())
                    .unwrap_or_default(),
            )
        },
        parse: index::parse_str,
    },
];

/// A reservation must not claim a network or broadcast address in any
/// subnet we know about.
pub(crate) fn on_create(r: &Reservation, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::RESERVATIONS, &r.key());
    for ent in d.store(prefix::SUBNETS).items() {
        if let Some(s) = ent.as_subnet() {
            if !s.subnet_contains(r.addr) {
                continue;
            }
            if !s.in_subnet_range(r.addr) {
                e.errorf(format!(
                    "Address {} is a network or broadcast address for subnet {}",
                    r.addr, s.name
                ));
            }
            break;
        }
    }
    e.or_ok()
}

pub(crate) fn on_change(old: &Reservation, new: &Reservation) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::RESERVATIONS, &new.key());
    if new.token != old.token {
        e.errorf("Token cannot change");
    }
    if new.strategy != old.strategy {
        e.errorf("Strategy cannot change");
    }
    e.or_ok()
}

pub(crate) fn before_save(r: &mut Reservation, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::RESERVATIONS, &r.key());
    validate_ip4(&mut e, "Addr", r.addr);
    validate_maybe_ip4(&mut e, "NextServer", r.next_server);
    if r.token.is_empty() {
        e.errorf("Reservation Token cannot be empty");
    }
    if r.strategy.is_empty() {
        e.errorf("Reservation Strategy cannot be empty");
    }
    // (strategy, token) identifies one client; it gets one address.
    for ent in d.store(prefix::RESERVATIONS).items() {
        if let Some(other) = ent.as_reservation() {
            if other.addr == r.addr {
                continue;
            }
            if other.token == r.token && other.strategy == r.strategy {
                e.errorf(format!(
                    "Reservation {} already has Strategy {}: Token {}",
                    other.key(),
                    r.strategy,
                    r.token
                ));
                break;
            }
        }
    }
    if !e.contains_error() {
        r.validation.finish(&e);
    }
    e.or_ok()
}
