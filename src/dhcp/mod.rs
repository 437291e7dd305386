//! DHCP lease management.
//!
//! The wire midlayer parses DHCP packets, extracts the leasing
//! strategy (how a client is recognised, e.g. "mac"), the token (the
//! strategy-specific client identity), the requested address, and the
//! relay chain, then calls into [`engine`]. Everything address-shaped
//! in this subsystem is keyed by [`hexaddr`], the uppercase hex form
//! of an IPv4 address that pxelinux-style boot loaders also use.

pub mod engine;

use std::net::Ipv4Addr;
use thiserror::Error;

/// Explicit DHCP negative.
///
/// Returning this from a lease entry point instructs the midlayer to
/// NAK the request. A silent drop is expressed as `Ok(None)` instead.
#[derive(Debug, Error)]
#[error("NAK: {0}")]
pub struct LeaseNak(pub String);

/// Hex-encoded IPv4 address, e.g. `192.168.124.10` → `C0A87C0A`.
///
/// Used as the cache key for leases and reservations, so both sort in
/// address order.
pub fn hexaddr(addr: Ipv4Addr) -> String {
    let o = addr.octets();
    format!("{:02X}{:02X}{:02X}{:02X}", o[0], o[1], o[2], o[3])
}

/// Parse a [`hexaddr`]-formatted key back into an address.
pub fn from_hexaddr(s: &str) -> Option<Ipv4Addr> {
    if s.len() != 8 {
        return None;
    }
    let n = u32::from_str_radix(s, 16).ok()?;
    Some(Ipv4Addr::from(n))
}

/// Whether an address is usable as a unicast host address.
///
/// Excludes unspecified, loopback, multicast, link-local, and the
/// limited broadcast address.
pub fn is_global_unicast(addr: Ipv4Addr) -> bool {
    !(addr.is_unspecified()
        || addr.is_loopback()
        || addr.is_multicast()
        || addr.is_link_local()
        || addr.is_broadcast())
}
