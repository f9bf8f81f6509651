use std::time::{Duration, Instant};

use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::Result;
use crate::desired::DesiredStateSource;
use crate::server::{IpamServer, SyncReport};

/// Reconciles the allocator with `source` every `interval` until `cancel`
/// fires. A failed pass ends the loop with its error so the process can be
/// restarted from the declared state. A zero interval disables syncing.
pub async fn run<S: DesiredStateSource>(
    server: IpamServer,
    source: S,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    if interval.is_zero() {
        info!("periodic sync disabled");
        cancel.cancelled().await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // startup already restored the declared state
    ticker.tick().await;
    loop {
        select! {
            _ = cancel.cancelled() => {
                info!("sync loop stopped");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }
        sync_once(&server, &source).await?;
    }
}

#[instrument(skip_all)]
async fn sync_once<S: DesiredStateSource>(server: &IpamServer, source: &S) -> Result<SyncReport> {
    let start = Instant::now();
    let result = match source.desired_state().await {
        Ok(desired) => server.sync(&desired),
        Err(e) => Err(e),
    };
    server.metrics().sync_finished(start.elapsed(), result.is_ok());

    match &result {
        Ok(report) => info!(
            networks_acquired = report.networks_acquired,
            networks_released = report.networks_released,
            networks_deferred = report.networks_deferred,
            ips_acquired = report.ips_acquired,
            ips_released = report.ips_released,
            ips_deferred = report.ips_deferred,
            merged = report.merged,
            "sync finished"
        ),
        Err(e) => error!(%e, "sync failed"),
    }
    result
}
