pub mod config;
pub mod daemon;
pub mod desired;
pub mod http;
pub mod kubernetes;
pub mod metrics;
pub mod server;
pub mod sync;

use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Ipam(#[from] mesh_cni_ipam::Error),

    #[error("invalid cidr {cidr}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("{0} is not part of any configured pool")]
    OutOfPool(IpNetwork),

    #[error("network {0} overlaps an allocated network")]
    NetworkConflict(IpNetwork),

    #[error("address {addr} is already leased in {network}")]
    AddressConflict { addr: IpAddr, network: IpNetwork },

    #[error("{0}")]
    Exhausted(String),

    #[error("cannot preallocate {count} addresses in {network}")]
    PreallocationExceedsCapacity { network: IpNetwork, count: u32 },

    #[error("ipam lock poisoned")]
    LockPoisoned,

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("crd error: {0}")]
    Crd(#[from] mesh_cni_crds::Error),

    #[error("failed to create store: {0}")]
    StoreCreation(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    YamlConversion(#[from] serde_yaml::Error),

    #[error("task failed: {0}")]
    Task(String),
}

/// Broad class of an error, shared by the HTTP status mapping and the
/// operation metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Malformed,
    OutOfPool,
    Conflict,
    Exhausted,
    Internal,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Malformed => "malformed",
            ErrorKind::OutOfPool => "out_of_pool",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Internal => "error",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use mesh_cni_ipam::Error as IpamError;
        match self {
            Error::InvalidCidr { .. }
            | Error::InvalidAddress { .. }
            | Error::PreallocationExceedsCapacity { .. }
            | Error::Ipam(IpamError::HostBitsSet(_))
            | Error::Ipam(IpamError::InvalidPrefixLength { .. })
            | Error::Ipam(IpamError::AddressOutOfNetwork { .. }) => ErrorKind::Malformed,
            Error::OutOfPool(_)
            | Error::Ipam(IpamError::NoSuitablePool(_))
            | Error::Ipam(IpamError::NoPoolForSize { .. })
            | Error::Ipam(IpamError::NetworkNotAcquired(_)) => ErrorKind::OutOfPool,
            Error::NetworkConflict(_) | Error::AddressConflict { .. } => ErrorKind::Conflict,
            Error::Exhausted(_) => ErrorKind::Exhausted,
            Error::Ipam(IpamError::OverlappingPools(..))
            | Error::LockPoisoned
            | Error::KubeError(_)
            | Error::Crd(_)
            | Error::StoreCreation(_)
            | Error::IoError(_)
            | Error::YamlConversion(_)
            | Error::Task(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn deserialize_from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let buf = String::deserialize(deserializer)?;
    T::from_str(&buf).map_err(|e| serde::de::Error::custom(e.to_string()))
}
