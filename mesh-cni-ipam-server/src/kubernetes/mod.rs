use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::serde::de::DeserializeOwned;
use kube::runtime::reflector::Store;
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use mesh_cni_crds::v1alpha1::ip::Ip;
use mesh_cni_crds::v1alpha1::network::Network;
use tracing::{error, trace, warn};

use crate::desired::{DesiredState, DesiredStateSource};
use crate::{Error, Result};

/// Starts a reflector over `api` and waits until its store holds the
/// initial listing.
pub async fn create_store<K>(api: Api<K>, timeout: Duration) -> Result<Store<K>>
where
    K: Resource + Send + Clone + Debug + DeserializeOwned + Sync + 'static,
    <K as Resource>::DynamicType: Default + Eq + Send + Sync + Hash + Clone,
{
    let (store, writer) = reflector::store();

    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .for_each(|res| async move {
            match res {
                Ok(ev) => trace!("received event: {:?}", ev),
                Err(e) => {
                    error!(%e, "unexpected error with stream")
                }
            }
        });

    tokio::spawn(stream);
    tokio::time::timeout(timeout, store.wait_until_ready())
        .await
        .map_err(|_| Error::StoreCreation(format!("store not ready after {timeout:?}")))?
        .map_err(|e| Error::StoreCreation(e.to_string()))?;
    Ok(store)
}

/// Desired state taken from the statuses of `Network` and `Ip` resources.
pub struct KubeDesiredState {
    networks: Store<Network>,
    ips: Store<Ip>,
}

impl KubeDesiredState {
    pub async fn try_new(client: Client, timeout: Duration) -> Result<Self> {
        let networks = create_store(Api::<Network>::all(client.clone()), timeout).await?;
        let ips = create_store(Api::<Ip>::all(client), timeout).await?;
        Ok(Self { networks, ips })
    }
}

impl DesiredStateSource for KubeDesiredState {
    async fn desired_state(&self) -> Result<DesiredState> {
        Ok(desired_from_resources(
            &self.networks.state(),
            &self.ips.state(),
        ))
    }
}

/// Builds the desired state from cached resources. Resources without an
/// allocation in their status are not declared yet, ones with an invalid
/// status are skipped.
pub fn desired_from_resources(networks: &[Arc<Network>], ips: &[Arc<Ip>]) -> DesiredState {
    let mut desired = DesiredState::default();
    for network in networks {
        match network.allocated() {
            Ok(Some((cidr, pre_allocated))) => {
                desired.networks.insert(cidr, pre_allocated);
            }
            Ok(None) => {}
            Err(e) => warn!(
                name = %network.name_any(),
                namespace = ?network.namespace(),
                %e,
                "skipping network with invalid status"
            ),
        }
    }
    for ip in ips {
        match ip.allocated() {
            Ok(Some((addr, cidr))) => {
                desired.ips.insert(addr, cidr);
            }
            Ok(None) => {}
            Err(e) => warn!(
                name = %ip.name_any(),
                namespace = ?ip.namespace(),
                %e,
                "skipping ip with invalid status"
            ),
        }
    }
    desired
}

#[cfg(test)]
mod test {
    use std::net::IpAddr;

    use ipnetwork::IpNetwork;
    use mesh_cni_crds::v1alpha1::ip::{IpSpec, IpStatus};
    use mesh_cni_crds::v1alpha1::network::{NetworkSpec, NetworkStatus};

    use super::*;

    fn make_network(name: &str, status: Option<&str>, pre_allocated: Option<u32>) -> Arc<Network> {
        let mut network = Network::new(
            name,
            NetworkSpec {
                cidr: "10.0.0.0/24".into(),
                pre_allocated,
            },
        );
        network.status = status.map(|cidr| NetworkStatus {
            cidr: Some(cidr.into()),
        });
        Arc::new(network)
    }

    fn make_ip(name: &str, ip: &str, cidr: &str) -> Arc<Ip> {
        let mut res = Ip::new(
            name,
            IpSpec {
                cidr: cidr.into(),
                ip: None,
            },
        );
        res.status = Some(IpStatus {
            ip: Some(ip.into()),
            cidr: Some(cidr.into()),
        });
        Arc::new(res)
    }

    #[test]
    fn test_desired_from_resources() {
        let networks = vec![
            make_network("a", Some("10.0.1.0/24"), Some(2)),
            make_network("pending", None, None),
            make_network("broken", Some("not-a-cidr"), None),
            make_network("unaligned", Some("10.0.2.5/24"), None),
        ];
        let ips = vec![
            make_ip("x", "10.0.1.5", "10.0.1.0/24"),
            make_ip("bad", "10.0.1.500", "10.0.1.0/24"),
            make_ip("unaligned", "10.0.2.9", "10.0.2.9/24"),
        ];

        let desired = desired_from_resources(&networks, &ips);
        assert_eq!(desired.networks.len(), 1);
        assert_eq!(
            desired.networks.get(&"10.0.1.0/24".parse::<IpNetwork>().unwrap()),
            Some(&2)
        );
        assert_eq!(desired.ips.len(), 1);
        assert_eq!(
            desired.ips.get(&"10.0.1.5".parse::<IpAddr>().unwrap()),
            Some(&"10.0.1.0/24".parse::<IpNetwork>().unwrap())
        );
    }
}
