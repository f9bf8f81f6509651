use std::net::IpAddr;

use ipnetwork::IpNetwork;
use thiserror::Error;

use crate::Family;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("prefix {0} has host bits set")]
    HostBitsSet(IpNetwork),

    #[error("no configured pool contains {0}")]
    NoSuitablePool(IpNetwork),

    #[error("no configured {family} pool can hold a /{size} network")]
    NoPoolForSize { family: Family, size: u8 },

    #[error("pools {0} and {1} overlap")]
    OverlappingPools(IpNetwork, IpNetwork),

    #[error("prefix length /{size} is invalid for {family}")]
    InvalidPrefixLength { family: Family, size: u8 },

    #[error("network {0} is not acquired")]
    NetworkNotAcquired(IpNetwork),

    #[error("address {addr} is not part of network {network}")]
    AddressOutOfNetwork { addr: IpAddr, network: IpNetwork },
}
