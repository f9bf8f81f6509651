use std::net::IpAddr;

use ipnetwork::IpNetwork;
use mesh_cni_ipam::{Ipam, prefix};

use crate::{Error, Result};

/// The first `count` addresses of `network`.
pub(crate) fn leading_addresses(network: &IpNetwork, count: u32) -> impl Iterator<Item = IpAddr> {
    let network = *network;
    (0..u128::from(count)).map_while(move |n| prefix::nth(&network, n))
}

pub(crate) fn in_preallocated_range(network: &IpNetwork, count: u32, addr: IpAddr) -> bool {
    prefix::offset(network, addr).is_some_and(|n| n < u128::from(count))
}

/// Leases the leading `count` addresses of an acquired network, skipping
/// the ones already leased. Returns how many were newly leased.
pub(crate) fn preallocate(ipam: &mut Ipam, network: &IpNetwork, count: u32) -> Result<usize> {
    if u128::from(count) > prefix::capacity(network) {
        return Err(Error::PreallocationExceedsCapacity {
            network: *network,
            count,
        });
    }
    let mut leased = 0;
    for addr in leading_addresses(network, count) {
        if ipam.ip_acquire_with_addr(network, addr)?.is_some() {
            leased += 1;
        }
    }
    Ok(leased)
}

#[cfg(test)]
mod test {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    #[test]
    fn test_leading_addresses() {
        let addrs: Vec<IpAddr> = leading_addresses(&net("10.0.0.0/30"), 8).collect();
        assert_eq!(addrs.len(), 4);
        assert_eq!(addrs[3], "10.0.0.3".parse::<IpAddr>().unwrap());
        assert_eq!(leading_addresses(&net("10.0.0.0/30"), 0).count(), 0);
    }

    #[test]
    fn test_in_preallocated_range() {
        let network = net("10.0.0.0/24");
        assert!(in_preallocated_range(&network, 2, "10.0.0.1".parse().unwrap()));
        assert!(!in_preallocated_range(&network, 2, "10.0.0.2".parse().unwrap()));
        assert!(!in_preallocated_range(&network, 2, "10.0.1.0".parse().unwrap()));
    }

    #[test]
    fn test_preallocate_is_idempotent() -> Result<()> {
        let mut ipam = Ipam::new([net("10.0.0.0/24")])?;
        let network = net("10.0.0.0/28");
        ipam.network_acquire_with_prefix(network)?;
        assert_eq!(preallocate(&mut ipam, &network, 3)?, 3);
        assert_eq!(preallocate(&mut ipam, &network, 4)?, 1);
        assert_eq!(ipam.list_ips(&network)?.len(), 4);
        assert!(matches!(
            preallocate(&mut ipam, &network, 17),
            Err(Error::PreallocationExceedsCapacity { count: 17, .. })
        ));
        Ok(())
    }
}
