use std::net::AddrParseError;

use ipnetwork::IpNetwork;
use kube::CustomResourceExt;
use thiserror::Error;

pub mod v1alpha1;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid network: {0}")]
    InvalidNetwork(#[from] ipnetwork::IpNetworkError),

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddrParseError),

    #[error("network {0} has host bits set")]
    HostBitsSet(IpNetwork),
}

/// Parses a CIDR recorded in a resource status. Allocations are always
/// block-aligned, so an address with host bits set is rejected.
pub(crate) fn parse_allocated_network(cidr: &str) -> Result<IpNetwork> {
    let network: IpNetwork = cidr.parse()?;
    if network.ip() != network.network() {
        return Err(Error::HostBitsSet(network));
    }
    Ok(network)
}

pub fn crd_gen_network() -> Result<()> {
    print!(
        "---\n{}",
        serde_yaml::to_string(&v1alpha1::network::Network::crd())?
    );
    Ok(())
}

pub fn crd_gen_ip() -> Result<()> {
    print!("---\n{}", serde_yaml::to_string(&v1alpha1::ip::Ip::crd())?);
    Ok(())
}

pub fn crd_gen_all() -> Result<()> {
    let crds = vec![v1alpha1::network::Network::crd(), v1alpha1::ip::Ip::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
