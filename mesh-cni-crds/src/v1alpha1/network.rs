use ipnetwork::IpNetwork;
use kube::CustomResource;
use kube::KubeSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Result, parse_allocated_network};

pub const NAME_GROUP_NETWORK: &str = "networks.ipam.mesh-cni.dev";

#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "ipam.mesh-cni.dev",
    version = "v1alpha1",
    kind = "Network",
    status = "NetworkStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Cidr","type":"string","jsonPath":".status.cidr"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Requested CIDR. The mask length is the requested size, the address
    /// is only honored when that exact block is free.
    pub cidr: String,
    /// Number of leading addresses reserved as soon as the network is
    /// allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_allocated: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct NetworkStatus {
    /// Allocated CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

impl Network {
    /// The allocated network and its preallocation count, once the status
    /// carries an allocation.
    pub fn allocated(&self) -> Result<Option<(IpNetwork, u32)>> {
        let Some(cidr) = self.status.as_ref().and_then(|s| s.cidr.as_deref()) else {
            return Ok(None);
        };
        let network = parse_allocated_network(cidr)?;
        Ok(Some((network, self.spec.pre_allocated.unwrap_or_default())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_network(pre_allocated: Option<u32>, status: Option<&str>) -> Network {
        let mut network = Network::new(
            "net-a",
            NetworkSpec {
                cidr: "10.0.0.0/24".into(),
                pre_allocated,
            },
        );
        network.status = status.map(|cidr| NetworkStatus {
            cidr: Some(cidr.into()),
        });
        network
    }

    #[test]
    fn test_allocated_without_status() {
        assert!(make_network(None, None).allocated().unwrap().is_none());

        let mut network = make_network(None, None);
        network.status = Some(NetworkStatus::default());
        assert!(network.allocated().unwrap().is_none());
    }

    #[test]
    fn test_allocated_reads_status() {
        let network = make_network(Some(3), Some("10.0.4.0/24"));
        assert_eq!(
            network.allocated().unwrap(),
            Some(("10.0.4.0/24".parse().unwrap(), 3))
        );
        let network = make_network(None, Some("fd00::/64"));
        assert_eq!(
            network.allocated().unwrap(),
            Some(("fd00::/64".parse().unwrap(), 0))
        );
    }

    #[test]
    fn test_allocated_invalid_status() {
        let network = make_network(None, Some("10.0.0.0/40"));
        assert!(network.allocated().is_err());

        let network = make_network(None, Some("10.0.4.5/24"));
        assert!(matches!(
            network.allocated(),
            Err(crate::Error::HostBitsSet(_))
        ));
    }

    #[test]
    fn test_spec_is_camel_case() {
        let spec = NetworkSpec {
            cidr: "10.0.0.0/24".into(),
            pre_allocated: Some(2),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["preAllocated"], 2);
    }
}
