use std::net::IpAddr;

use ipnetwork::IpNetwork;
use mesh_cni_ipam::prefix;

use crate::{Error, Result};

pub(crate) fn parse_network(cidr: &str) -> Result<IpNetwork> {
    let network: IpNetwork = cidr.trim().parse().map_err(|e: ipnetwork::IpNetworkError| {
        Error::InvalidCidr {
            cidr: cidr.into(),
            reason: e.to_string(),
        }
    })?;
    if prefix::has_host_bits(&network) {
        return Err(Error::InvalidCidr {
            cidr: cidr.into(),
            reason: "host bits are set".into(),
        });
    }
    Ok(network)
}

pub(crate) fn parse_ip(addr: &str) -> Result<IpAddr> {
    addr.trim()
        .parse()
        .map_err(|e: std::net::AddrParseError| Error::InvalidAddress {
            addr: addr.into(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_network() {
        assert_eq!(
            parse_network(" 10.0.0.0/24").unwrap(),
            "10.0.0.0/24".parse::<IpNetwork>().unwrap()
        );
        assert!(matches!(
            parse_network("10.0.0.1/24"),
            Err(Error::InvalidCidr { .. })
        ));
        assert!(matches!(
            parse_network("banana"),
            Err(Error::InvalidCidr { .. })
        ));
        assert!(matches!(
            parse_network("10.0.0.0/33"),
            Err(Error::InvalidCidr { .. })
        ));
    }

    #[test]
    fn test_parse_ip() {
        assert_eq!(
            parse_ip("fd00::1").unwrap(),
            "fd00::1".parse::<IpAddr>().unwrap()
        );
        assert!(matches!(
            parse_ip("10.0.0.256"),
            Err(Error::InvalidAddress { .. })
        ));
    }
}
