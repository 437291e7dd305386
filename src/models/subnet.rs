//! DHCP subnets.
//!
//! A subnet describes one network the DHCP engine can allocate from:
//! the CIDR, the active allocation range, default lease durations, and
//! the leasing strategy clients in that network are recognised by.

use super::{prefix, validate_ip4, validate_maybe_ip4, DhcpOption, Validation};
use crate::core::error::ModelError;
use crate::dhcp::hexaddr;
use crate::tracker::index::{self, Index, IndexValue};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Address-picking policies a subnet can use.
///
/// `next_free` is the only policy currently defined: hand out the
/// first unused address in the active range, falling back to stealing
/// the most-expired reservation-free lease when the range is full.
pub const PICK_STRATEGIES: [&str; 1] = ["next_free"];

/// A DHCP subnet definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Subnet {
    #[serde(flatten)]
    pub validation: Validation,
    /// Unique subnet name.
    pub name: String,
    /// What this subnet covers.
    pub description: String,
    /// Network in CIDR form, e.g. `192.168.124.0/24`.
    pub subnet: String,
    /// Address handed to clients as the next boot server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_server: Option<Ipv4Addr>,
    /// First address leases are allocated from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_start: Option<Ipv4Addr>,
    /// Last address leases are allocated from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_end: Option<Ipv4Addr>,
    /// Seconds a non-reserved lease lasts. At least 60.
    pub active_lease_time: i32,
    /// Seconds a reservation-backed lease lasts. At least 7200.
    pub reserved_lease_time: i32,
    /// Only hand out leases backed by reservations.
    pub only_reservations: bool,
    /// DHCP options every lease in this subnet gets.
    pub options: Vec<DhcpOption>,
    /// Leasing strategy clients in this subnet are recognised by.
    pub strategy: String,
    /// Address-picking policy.
    pub pick_strategy: String,
}

impl Default for Subnet {
    fn default() -> Self {
        Self {
            validation: Validation::default(),
            name: String::new(),
            description: String::new(),
            subnet: String::new(),
            next_server: None,
            active_start: None,
            active_end: None,
            active_lease_time: 0,
            reserved_lease_time: 0,
            only_reservations: false,
            options: Vec::new(),
            strategy: String::new(),
            pick_strategy: "next_free".to_string(),
        }
    }
}

/// Parsed CIDR network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cidr {
    pub network: u32,
    pub bits: u8,
}

impl Cidr {
    pub fn parse(s: &str) -> Result<Self, String> {
        let (addr, bits) = s
            .split_once('/')
            .ok_or_else(|| format!("Invalid subnet {s}"))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| format!("Invalid subnet {s}"))?;
        let bits: u8 = bits.parse().map_err(|_| format!("Invalid subnet {s}"))?;
        if bits > 32 {
            return Err(format!("Invalid subnet {s}"));
        }
        Ok(Self {
            network: u32::from(addr) & Self::mask(bits),
            bits,
        })
    }

    fn mask(bits: u8) -> u32 {
        if bits == 0 {
            0
        } else {
            u32::MAX << (32 - bits)
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask(self.bits) == self.network
    }

    pub fn network_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn broadcast_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !Self::mask(self.bits))
    }
}

impl Subnet {
    pub fn key(&self) -> String {
        self.name.clone()
    }

    pub(crate) fn cidr(&self) -> Option<Cidr> {
        Cidr::parse(&self.subnet).ok()
    }

    /// Whether `ip` is inside the CIDR at all (network and broadcast
    /// included).
    pub fn subnet_contains(&self, ip: Ipv4Addr) -> bool {
        self.cidr().map(|c| c.contains(ip)).unwrap_or(false)
    }

    /// Whether `ip` is a host address inside the CIDR (network and
    /// broadcast excluded).
    pub fn in_subnet_range(&self, ip: Ipv4Addr) -> bool {
        match self.cidr() {
            Some(c) => c.contains(ip) && ip != c.network_addr() && ip != c.broadcast_addr(),
            None => false,
        }
    }

    /// Whether `ip` may be handed out as a non-reserved lease.
    pub fn in_active_range(&self, ip: Ipv4Addr) -> bool {
        if self.only_reservations {
            return false;
        }
        match (self.active_start, self.active_end) {
            (Some(lo), Some(hi)) => {
                let (ip, lo, hi) = (u32::from(ip), u32::from(lo), u32::from(hi));
                ip >= lo && ip <= hi
            }
            _ => false,
        }
    }

    /// Lease duration for an address in this subnet.
    pub fn lease_time_for(&self, ip: Ipv4Addr) -> Duration {
        if self.in_active_range(ip) {
            Duration::seconds(self.active_lease_time as i64)
        } else {
            Duration::seconds(self.reserved_lease_time as i64)
        }
    }

    /// Hex-key bounds `[lower, upper)` covering the active range, for
    /// subsetting the lease and reservation caches.
    pub fn active_bounds(&self) -> Option<(String, String)> {
        let (lo, hi) = (self.active_start?, self.active_end?);
        let upper = u32::from(hi).checked_add(1)?;
        Some((hexaddr(lo), hexaddr(Ipv4Addr::from(upper))))
    }

    /// Pick the next free address given the set of used hex keys.
    ///
    /// Returns the address, if any, and whether the policy permits
    /// falling back to stealing an expired lease when none is free.
    pub fn next_free(&self, used: &HashSet<String>) -> (Option<Ipv4Addr>, bool) {
        if self.only_reservations {
            return (None, false);
        }
        let (lo, hi) = match (self.active_start, self.active_end) {
            (Some(lo), Some(hi)) => (u32::from(lo), u32::from(hi)),
            _ => return (None, false),
        };
        for n in lo..=hi {
            let addr = Ipv4Addr::from(n);
            if !used.contains(&hexaddr(addr)) {
                return (Some(addr), true);
            }
        }
        (None, true)
    }
}

pub static INDEXES: [Index; 3] = [
    Index {
        name: "Name",
        kind: "string",
        unique: true,
        key_of: |e| IndexValue::Str(e.key()),
        parse: index::parse_str,
    },
    Index {
        name: "Strategy",
        kind: "string",
        unique: false,
        key_of: |e| {
            IndexValue::Str(e.as_subnet().map(|s| s.strategy.clone()).unwrap_or_default())
        },
        parse: index::parse_str,
    },
    Index {
        name: "NextServer",
        kind: "IP Address",
        unique: false,
        key_of: |e| {
            IndexValue::Ip(
                e.as_subnet()
                    .and_then(|s| s.next_server)
                    .map(u32::from)
                    .unwrap_or(0),
            )
        },
        parse: index::parse_ip,
    },
];

pub(crate) fn before_save(s: &mut Subnet) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::SUBNETS, &s.name);
    if s.name.is_empty() {
        e.errorf("Subnet must have a name");
    }
    let cidr = match Cidr::parse(&s.subnet) {
        Ok(c) => Some(c),
        Err(msg) => {
            e.errorf(msg);
            None
        }
    };
    validate_maybe_ip4(&mut e, "NextServer", s.next_server);
    if !s.only_reservations {
        match (s.active_start, s.active_end) {
            (Some(lo), Some(hi)) => {
                validate_ip4(&mut e, "ActiveStart", lo);
                validate_ip4(&mut e, "ActiveEnd", hi);
                if let Some(c) = cidr {
                    if !c.contains(lo) {
                        e.errorf(format!("ActiveStart {lo} not in subnet range {}", s.subnet));
                    }
                    if !c.contains(hi) {
                        e.errorf(format!("ActiveEnd {hi} not in subnet range {}", s.subnet));
                    }
                }
                if u32::from(lo) > u32::from(hi) {
                    e.errorf(format!("ActiveStart {lo} must not be after ActiveEnd {hi}"));
                }
            }
            _ => e.errorf("Subnet must have both ActiveStart and ActiveEnd"),
        }
        if s.active_lease_time < 60 {
            e.errorf(format!(
                "ActiveLeaseTime must be greater than or equal to 60 seconds, not {}",
                s.active_lease_time
            ));
        }
    }
    if s.reserved_lease_time < 7200 {
        e.errorf(format!(
            "ReservedLeaseTime must be greater than or equal to 7200 seconds, not {}",
            s.reserved_lease_time
        ));
    }
    if s.strategy.is_empty() {
        e.errorf("Subnet Strategy cannot be empty");
    }
    if !PICK_STRATEGIES.contains(&s.pick_strategy.as_str()) {
        e.errorf(format!("Unknown pick strategy {}", s.pick_strategy));
    }
    if !e.contains_error() {
        s.validation.finish(&e);
    }
    e.or_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet() -> Subnet {
        Subnet {
            name: "test".to_string(),
            subnet: "192.168.124.0/24".to_string(),
            active_start: Some(Ipv4Addr::new(192, 168, 124, 80)),
            active_end: Some(Ipv4Addr::new(192, 168, 124, 254)),
            active_lease_time: 60,
            reserved_lease_time: 7200,
            strategy: "mac".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn cidr_membership() {
        let s = subnet();
        assert!(s.subnet_contains(Ipv4Addr::new(192, 168, 124, 0)));
        assert!(!s.in_subnet_range(Ipv4Addr::new(192, 168, 124, 0)));
        assert!(!s.in_subnet_range(Ipv4Addr::new(192, 168, 124, 255)));
        assert!(s.in_subnet_range(Ipv4Addr::new(192, 168, 124, 10)));
        assert!(!s.subnet_contains(Ipv4Addr::new(192, 168, 125, 10)));
    }

    #[test]
    fn active_range_and_lease_times() {
        let s = subnet();
        assert!(s.in_active_range(Ipv4Addr::new(192, 168, 124, 80)));
        assert!(!s.in_active_range(Ipv4Addr::new(192, 168, 124, 10)));
        assert_eq!(
            s.lease_time_for(Ipv4Addr::new(192, 168, 124, 100)),
            Duration::seconds(60)
        );
        assert_eq!(
            s.lease_time_for(Ipv4Addr::new(192, 168, 124, 10)),
            Duration::seconds(7200)
        );
    }

    #[test]
    fn next_free_skips_used_addresses() {
        let s = subnet();
        let mut used = HashSet::new();
        used.insert(hexaddr(Ipv4Addr::new(192, 168, 124, 80)));
        used.insert(hexaddr(Ipv4Addr::new(192, 168, 124, 81)));
        let (addr, fallback) = s.next_free(&used);
        assert_eq!(addr, Some(Ipv4Addr::new(192, 168, 124, 82)));
        assert!(fallback);
    }

    #[test]
    fn next_free_exhaustion_permits_fallback() {
        let mut s = subnet();
        s.active_end = Some(Ipv4Addr::new(192, 168, 124, 81));
        let mut used = HashSet::new();
        used.insert(hexaddr(Ipv4Addr::new(192, 168, 124, 80)));
        used.insert(hexaddr(Ipv4Addr::new(192, 168, 124, 81)));
        let (addr, fallback) = s.next_free(&used);
        assert_eq!(addr, None);
        assert!(fallback);
    }

    #[test]
    fn validation_enforces_ranges_and_times() {
        let mut ok = subnet();
        assert!(before_save(&mut ok).is_ok());

        let mut bad = subnet();
        bad.active_lease_time = 59;
        assert!(before_save(&mut bad).is_err());

        let mut bad = subnet();
        bad.reserved_lease_time = 7199;
        assert!(before_save(&mut bad).is_err());

        let mut bad = subnet();
        bad.active_start = Some(Ipv4Addr::new(192, 168, 125, 80));
        assert!(before_save(&mut bad).is_err());

        let mut bad = subnet();
        bad.pick_strategy = "roulette".to_string();
        assert!(before_save(&mut bad).is_err());
    }

    #[test]
    fn only_reservations_skips_active_checks() {
        let mut s = subnet();
        s.only_reservations = true;
        s.active_start = None;
        s.active_end = None;
        s.active_lease_time = 0;
        assert!(before_save(&mut s).is_ok());
        assert!(!s.in_active_range(Ipv4Addr::new(192, 168, 124, 100)));
    }
}
