//! # Network Module
//!
//! This module provides the source address filtering used by every UDP listener of the control
//! plane.
//!
//! An allow-list is built from literal addresses and CIDR blocks. An empty list allows every
//! source. Checking an address which cannot be parsed also allows it, so that a typo in the
//! configuration cannot lock the operator out of the robot.
//!
//! NOTE: both fail-open behaviours are kept deliberately but they weaken access control, they
//! should be reviewed before the robot runs on an untrusted network.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::net::IpAddr;
use log::warn;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A set of allowed source addresses.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Vec<AllowEntry>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A single allow-list entry.
#[derive(Debug, Clone, PartialEq)]
enum AllowEntry {
    /// A single address
    Addr(IpAddr),

    /// A network given by its base address and prefix length
    Cidr(IpAddr, u8),

    /// An entry which could not be parsed, it never matches
    Invalid(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AllowList {
    /// Build an allow-list from configuration strings.
    ///
    /// Entries containing a `/` are parsed as CIDR blocks, all others as single addresses. Host
    /// bits set in a CIDR base address are ignored (`10.0.0.7/24` is `10.0.0.0/24`).
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let entries = entries
            .iter()
            .map(|e| {
                let entry = AllowEntry::parse(e.as_ref());
                if let AllowEntry::Invalid(ref s) = entry {
                    warn!("Ignoring invalid allowed source entry \"{}\"", s);
                }
                entry
            })
            .collect();

        Self { entries }
    }

    /// An allow-list which allows every source.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// True if no entries were configured, in which case every source is allowed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if the given source address is allowed.
    pub fn is_allowed(&self, addr: &IpAddr) -> bool {
        if self.entries.is_empty() {
            return true
        }

        self.entries.iter().any(|e| e.matches(addr))
    }

    /// Check a textual source address.
    ///
    /// An address which cannot be parsed is allowed.
    pub fn is_allowed_str(&self, addr: &str) -> bool {
        match addr.trim().parse::<IpAddr>() {
            Ok(a) => self.is_allowed(&a),
            Err(_) => {
                warn!("Could not parse source address \"{}\", allowing it", addr);
                true
            }
        }
    }
}

impl AllowEntry {
    fn parse(entry: &str) -> Self {
        let entry = entry.trim();

        match entry.split_once('/') {
            Some((base, prefix)) => {
                let base: IpAddr = match base.trim().parse() {
                    Ok(b) => b,
                    Err(_) => return AllowEntry::Invalid(entry.into())
                };
                let max_prefix = match base {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128
                };
                match prefix.trim().parse::<u8>() {
                    Ok(p) if p <= max_prefix => AllowEntry::Cidr(base, p),
                    _ => AllowEntry::Invalid(entry.into())
                }
            },
            None => match entry.parse() {
                Ok(a) => AllowEntry::Addr(a),
                Err(_) => AllowEntry::Invalid(entry.into())
            }
        }
    }

    fn matches(&self, addr: &IpAddr) -> bool {
        match self {
            AllowEntry::Addr(a) => a == addr,
            AllowEntry::Cidr(base, prefix) => match (base, addr) {
                (IpAddr::V4(b), IpAddr::V4(a)) => {
                    prefix_eq(&b.octets(), &a.octets(), *prefix)
                },
                (IpAddr::V6(b), IpAddr::V6(a)) => {
                    prefix_eq(&b.octets(), &a.octets(), *prefix)
                },
                _ => false
            },
            AllowEntry::Invalid(_) => false
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compare the first `prefix` bits of two addresses.
fn prefix_eq(a: &[u8], b: &[u8], prefix: u8) -> bool {
    let full_bytes = (prefix / 8) as usize;
    let rem_bits = prefix % 8;

    if a[..full_bytes] != b[..full_bytes] {
        return false
    }

    if rem_bits == 0 {
        return true
    }

    let mask = 0xffu8 << (8 - rem_bits);
    (a[full_bytes] & mask) == (b[full_bytes] & mask)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
