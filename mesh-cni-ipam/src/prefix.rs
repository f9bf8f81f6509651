//! Arithmetic over CIDR prefixes.
//!
//! Addresses of both families are handled as `u128` values so a single
//! implementation covers IPv4 and IPv6.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(network: &IpNetwork) -> Self {
        match network {
            IpNetwork::V4(_) => Family::V4,
            IpNetwork::V6(_) => Family::V6,
        }
    }

    pub fn of_addr(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    /// Longest prefix length of the family, i.e. its address width in bits.
    pub fn max_prefix(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::V4 => write!(f, "IPv4"),
            Family::V6 => write!(f, "IPv6"),
        }
    }
}

pub(crate) fn to_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(addr) => u128::from(addr.to_bits()),
        IpAddr::V6(addr) => addr.to_bits(),
    }
}

// callers guarantee `bits` fits the family width
pub(crate) fn from_bits(family: Family, bits: u128) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from_bits(bits as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from_bits(bits)),
    }
}

/// True when the address part of `network` is not the network address.
pub fn has_host_bits(network: &IpNetwork) -> bool {
    network.ip() != network.network()
}

pub fn validate(network: &IpNetwork) -> Result<()> {
    if has_host_bits(network) {
        return Err(Error::HostBitsSet(*network));
    }
    Ok(())
}

/// Same address and mask length, ignoring any host bits.
pub fn same(a: &IpNetwork, b: &IpNetwork) -> bool {
    a.prefix() == b.prefix() && a.network() == b.network()
}

pub fn overlaps(a: &IpNetwork, b: &IpNetwork) -> bool {
    Family::of(a) == Family::of(b) && (a.contains(b.network()) || b.contains(a.network()))
}

/// `candidate` lies inside `parent` (or is `parent` itself).
pub fn is_child_of(parent: &IpNetwork, candidate: &IpNetwork) -> bool {
    parent.prefix() <= candidate.prefix() && overlaps(parent, candidate)
}

/// Splits `network` into its two buddy halves.
///
/// The left half keeps the network address, the right half sets the bit
/// right after the mask. Both halves have a mask one bit longer. Calling
/// this with host bits set or with a full-length prefix is a bug in the
/// caller.
pub fn split(network: &IpNetwork) -> (IpNetwork, IpNetwork) {
    debug_assert!(!has_host_bits(network), "split of {network} with host bits");
    let family = Family::of(network);
    debug_assert!(network.prefix() < family.max_prefix());

    let child_prefix = network.prefix() + 1;
    let base = to_bits(network.network());
    let right = base | 1u128 << (family.max_prefix() - child_prefix);
    (
        new_network(from_bits(family, base), child_prefix),
        new_network(from_bits(family, right), child_prefix),
    )
}

fn new_network(addr: IpAddr, prefix: u8) -> IpNetwork {
    IpNetwork::new(addr, prefix).expect("child prefix length is within the address family")
}

/// Number of addresses in `network`, saturated for an IPv6 `/0`.
pub fn capacity(network: &IpNetwork) -> u128 {
    let host_bits = Family::of(network).max_prefix() - network.prefix();
    1u128.checked_shl(u32::from(host_bits)).unwrap_or(u128::MAX)
}

/// The `n`th address of `network`, counting from the network address.
pub fn nth(network: &IpNetwork, n: u128) -> Option<IpAddr> {
    if n >= capacity(network) {
        return None;
    }
    let base = to_bits(network.network());
    Some(from_bits(Family::of(network), base + n))
}

/// Position of `addr` within `network`, if it belongs to it.
pub fn offset(network: &IpNetwork, addr: IpAddr) -> Option<u128> {
    if !network.contains(addr) {
        return None;
    }
    Some(to_bits(addr) - to_bits(network.network()))
}

/// Address following `addr`, wrapping to the network address after the last
/// address of `network`.
pub fn next_in(network: &IpNetwork, addr: IpAddr) -> IpAddr {
    match offset(network, addr).and_then(|n| n.checked_add(1)) {
        Some(n) => nth(network, n).unwrap_or_else(|| network.network()),
        None => network.network(),
    }
}
