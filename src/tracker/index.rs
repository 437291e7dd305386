//! Secondary index descriptors.
//!
//! Every entity type registers a set of named indexes. An index is a
//! small descriptor: a name, a value kind, a uniqueness flag, a
//! projection from an entity to a totally ordered [`IndexValue`], and
//! a parser from the string form back to an `IndexValue` for range
//! queries. Ordering over `IndexValue` supplies the total order, the
//! lower-bound test, and the strict-greater test the cache needs for
//! binary-search subsetting.

use crate::models::Entity;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// A single point in an index's order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    /// Plain string order.
    Str(String),
    /// Booleans order false before true.
    Bool(bool),
    /// Signed integer order.
    Int(i64),
    /// IPv4 addresses in numeric order.
    Ip(u32),
    /// Timestamps in chronological order.
    Time(DateTime<Utc>),
    /// UUIDs in their canonical string order.
    Uuid(Uuid),
}

impl IndexValue {
    /// Build from an IPv4 address.
    pub fn ip(addr: Ipv4Addr) -> Self {
        Self::Ip(u32::from(addr))
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Str(_) => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Ip(_) => 3,
            Self::Time(_) => 4,
            Self::Uuid(_) => 5,
        }
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Ip(a), Self::Ip(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.to_string().cmp(&b.to_string()),
            // Mixed kinds never meet inside one index; order by kind so
            // Ord stays total anyway.
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A named secondary index over one entity type.
pub struct Index {
    /// Index name as exposed to list queries ("Name", "Addr", ...).
    pub name: &'static str,
    /// Human-readable value kind ("string", "IP Address", ...).
    pub kind: &'static str,
    /// Whether values must be unique across the prefix.
    pub unique: bool,
    /// Projection from an entity to its point in this index's order.
    pub key_of: fn(&Entity) -> IndexValue,
    /// Parse the string form of a query bound.
    pub parse: fn(&str) -> Result<IndexValue, String>,
}

impl Index {
    /// Look up an index by name in a descriptor table.
    pub fn named<'a>(indexes: &'a [Index], name: &str) -> Option<&'a Index> {
        indexes.iter().find(|i| i.name == name)
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("unique", &self.unique)
            .finish()
    }
}

/// Standard string-bound parser.
pub fn parse_str(s: &str) -> Result<IndexValue, String> {
    Ok(IndexValue::Str(s.to_string()))
}

/// Standard boolean-bound parser.
pub fn parse_bool(s: &str) -> Result<IndexValue, String> {
    match s {
        "true" => Ok(IndexValue::Bool(true)),
        "false" => Ok(IndexValue::Bool(false)),
        _ => Err(format!("{s} must be true or false")),
    }
}

/// Standard IPv4-bound parser.
pub fn parse_ip(s: &str) -> Result<IndexValue, String> {
    s.parse::<Ipv4Addr>()
        .map(IndexValue::ip)
        .map_err(|_| format!("Invalid address: {s}"))
}

/// Standard RFC 3339 timestamp parser.
pub fn parse_time(s: &str) -> Result<IndexValue, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| IndexValue::Time(t.with_timezone(&Utc)))
        .map_err(|e| format!("Invalid time {s}: {e}"))
}

/// Standard UUID parser.
pub fn parse_uuid(s: &str) -> Result<IndexValue, String> {
    Uuid::parse_str(s)
        .map(IndexValue::Uuid)
        .map_err(|_| format!("Invalid UUID: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_order_is_numeric() {
        let a = parse_ip("192.168.124.9").unwrap();
        let b = parse_ip("192.168.124.80").unwrap();
        assert!(a < b);
    }

    #[test]
    fn bool_order_is_false_then_true() {
        assert!(parse_bool("false").unwrap() < parse_bool("true").unwrap());
    }

    #[test]
    fn bad_bounds_are_rejected() {
        assert!(parse_ip("not-an-ip").is_err());
        assert!(parse_bool("yes").is_err());
        assert!(parse_uuid("nope").is_err());
        assert!(parse_time("yesterday").is_err());
    }
}
