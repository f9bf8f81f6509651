use std::net::IpAddr;
use std::path::PathBuf;

use ahash::HashMap;
use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::kubernetes::KubeDesiredState;
use crate::server::preallocation::in_preallocated_range;
use crate::{Result, deserialize_from_str};

/// Snapshot of what the cluster declares: allocated networks with their
/// preallocation count and leased addresses with their owning network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub networks: HashMap<IpNetwork, u32>,
    pub ips: HashMap<IpAddr, IpNetwork>,
}

impl DesiredState {
    /// `addr` falls in the preallocated head of a declared `network`.
    pub fn is_preallocated(&self, network: &IpNetwork, addr: IpAddr) -> bool {
        self.networks
            .get(network)
            .is_some_and(|count| in_preallocated_range(network, *count, addr))
    }

    /// Whether `addr` is declared as leased from `network`.
    pub fn declares_ip(&self, network: &IpNetwork, addr: IpAddr) -> bool {
        self.ips.get(&addr) == Some(network)
    }
}

/// Lists the full desired state. Implementations must not hold the
/// allocator while listing.
pub trait DesiredStateSource: Send + Sync {
    fn desired_state(&self) -> impl Future<Output = Result<DesiredState>> + Send;
}

impl DesiredStateSource for DesiredState {
    async fn desired_state(&self) -> Result<DesiredState> {
        Ok(self.clone())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DesiredStateFile {
    #[serde(default)]
    networks: Vec<NetworkEntry>,
    #[serde(default)]
    ips: Vec<IpEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkEntry {
    #[serde(deserialize_with = "deserialize_from_str")]
    cidr: IpNetwork,
    #[serde(default)]
    pre_allocated: u32,
}

#[derive(Deserialize)]
struct IpEntry {
    ip: IpAddr,
    #[serde(deserialize_with = "deserialize_from_str")]
    cidr: IpNetwork,
}

/// Parses a desired state document:
///
/// ```yaml
/// networks:
///   - cidr: 10.0.0.0/24
///     preAllocated: 2
/// ips:
///   - ip: 10.0.0.7
///     cidr: 10.0.0.0/24
/// ```
pub fn parse_desired_state(yaml: &str) -> Result<DesiredState> {
    let file: DesiredStateFile = serde_yaml::from_str(yaml)?;
    Ok(DesiredState {
        networks: file
            .networks
            .into_iter()
            .map(|n| (n.cidr, n.pre_allocated))
            .collect(),
        ips: file.ips.into_iter().map(|i| (i.ip, i.cidr)).collect(),
    })
}

/// Desired state read from a YAML file on every listing.
#[derive(Debug, Clone)]
pub struct FileDesiredState {
    path: PathBuf,
}

impl FileDesiredState {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl DesiredStateSource for FileDesiredState {
    async fn desired_state(&self) -> Result<DesiredState> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        parse_desired_state(&contents)
    }
}

pub enum Source {
    Kubernetes(KubeDesiredState),
    File(FileDesiredState),
}

impl DesiredStateSource for Source {
    async fn desired_state(&self) -> Result<DesiredState> {
        match self {
            Source::Kubernetes(kube) => kube.desired_state().await,
            Source::File(file) => file.desired_state().await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_desired_state() {
        let yaml = r#"
networks:
  - cidr: 10.0.0.0/24
    preAllocated: 2
  - cidr: fd00::/64
ips:
  - ip: 10.0.0.7
    cidr: 10.0.0.0/24
"#;
        let desired = parse_desired_state(yaml).unwrap();
        let v4: IpNetwork = "10.0.0.0/24".parse().unwrap();
        let v6: IpNetwork = "fd00::/64".parse().unwrap();
        assert_eq!(desired.networks.get(&v4), Some(&2));
        assert_eq!(desired.networks.get(&v6), Some(&0));
        assert!(desired.declares_ip(&v4, "10.0.0.7".parse().unwrap()));
        assert!(!desired.declares_ip(&v6, "10.0.0.7".parse().unwrap()));
    }

    #[test]
    fn test_parse_rejects_bad_cidr() {
        let yaml = "networks:\n  - cidr: 10.0.0.0/99\n";
        assert!(parse_desired_state(yaml).is_err());
        assert_eq!(parse_desired_state("{}").unwrap(), DesiredState::default());
    }

    #[test]
    fn test_is_preallocated() {
        let network: IpNetwork = "10.0.0.0/24".parse().unwrap();
        let mut desired = DesiredState::default();
        desired.networks.insert(network, 2);
        assert!(desired.is_preallocated(&network, "10.0.0.1".parse().unwrap()));
        assert!(!desired.is_preallocated(&network, "10.0.0.2".parse().unwrap()));
        let other: IpNetwork = "10.0.1.0/24".parse().unwrap();
        assert!(!desired.is_preallocated(&other, "10.0.1.0".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_static_source() {
        let mut desired = DesiredState::default();
        desired.networks.insert("10.0.0.0/24".parse().unwrap(), 1);
        assert_eq!(desired.desired_state().await.unwrap(), desired);
    }
}
