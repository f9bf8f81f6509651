use std::sync::PoisonError;

use kube::Client;
use mesh_cni_ipam::Ipam;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServeArgs;
use crate::desired::{DesiredStateSource, FileDesiredState, Source};
use crate::http::{self, ApiState};
use crate::kubernetes::KubeDesiredState;
use crate::metrics::{IpamMetrics, REGISTRY};
use crate::server::IpamServer;
use crate::{Error, Result, sync};

/// Restores the declared state, then serves the API and runs the sync loop
/// until `cancel` fires or either of them fails. `ready` is cancelled once
/// requests can be served.
pub async fn start(args: ServeArgs, ready: CancellationToken, cancel: CancellationToken) -> Result<()> {
    if args.pools.is_empty() {
        info!("no pools configured, ipam disabled");
        ready.cancel();
        return http::serve_api(args.listen_address, ApiState::disabled(), cancel).await;
    }

    let ipam = Ipam::new(args.pools.iter().copied())?;
    info!(pools = ?args.pools, grace_period = ?args.grace_period, "ipam configured");
    let metrics = {
        let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
        IpamMetrics::default().register(&mut registry)
    };
    let server = IpamServer::new(ipam, args.grace_period, metrics);

    let source = match args.desired_state_file {
        Some(path) => {
            info!(path = %path.display(), "reading desired state from file");
            Source::File(FileDesiredState::new(path))
        }
        None => {
            let client = Client::try_default().await?;
            Source::Kubernetes(KubeDesiredState::try_new(client, args.store_timeout).await?)
        }
    };

    let desired = source.desired_state().await?;
    server.initialize(&desired)?;
    ready.cancel();

    let api = tokio::spawn(http::serve_api(
        args.listen_address,
        ApiState::new(server.clone()),
        cancel.child_token(),
    ));
    let sync = tokio::spawn(sync::run(
        server,
        source,
        args.sync_interval,
        cancel.child_token(),
    ));
    tokio::try_join!(flatten(api), flatten(sync))?;
    Ok(())
}

async fn flatten(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle.await.map_err(|e| Error::Task(e.to_string()))?
}
