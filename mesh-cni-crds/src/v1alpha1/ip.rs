use std::net::IpAddr;

use ipnetwork::IpNetwork;
use kube::CustomResource;
use kube::KubeSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Result, parse_allocated_network};

pub const NAME_GROUP_IP: &str = "ips.ipam.mesh-cni.dev";

#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "ipam.mesh-cni.dev",
    version = "v1alpha1",
    kind = "Ip",
    status = "IpStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ip","type":"string","jsonPath":".status.ip"}"#,
    printcolumn = r#"{"name":"Cidr","type":"string","jsonPath":".status.cidr"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IpSpec {
    /// Network the address is leased from
    pub cidr: String,
    /// Specific address to lease. Any free address is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct IpStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

impl Ip {
    /// The leased address and the network it belongs to, once the status
    /// carries both.
    pub fn allocated(&self) -> Result<Option<(IpAddr, IpNetwork)>> {
        let Some(status) = &self.status else {
            return Ok(None);
        };
        let (Some(ip), Some(cidr)) = (status.ip.as_deref(), status.cidr.as_deref()) else {
            return Ok(None);
        };
        Ok(Some((ip.parse()?, parse_allocated_network(cidr)?)))
    }
}
