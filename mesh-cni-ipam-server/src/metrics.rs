use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};

pub static REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::with_prefix("mesh_cni_ipam")));

#[derive(Clone)]
pub struct IpamMetrics {
    pub operations: Family<OperationLabels, Counter>,
    pub sync_runs: Counter,
    pub sync_failures: Counter,
    pub sync_duration: Histogram,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
    pub outcome: String,
}

impl Default for IpamMetrics {
    fn default() -> Self {
        Self {
            operations: Family::<OperationLabels, Counter>::default(),
            sync_runs: Counter::default(),
            sync_failures: Counter::default(),
            sync_duration: Histogram::new([0.001, 0.01, 0.1, 0.25, 0.5, 1.0, 5.0, 15.0].into_iter()),
        }
    }
}

impl IpamMetrics {
    /// Register IPAM metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register(
            "operations",
            "Number of allocator operations by outcome",
            self.operations.clone(),
        );
        r.register("sync_runs", "Number of sync passes", self.sync_runs.clone());
        r.register(
            "sync_failures",
            "Number of failed sync passes",
            self.sync_failures.clone(),
        );
        r.register_with_unit(
            "sync_duration",
            "sync pass duration",
            Unit::Seconds,
            self.sync_duration.clone(),
        );
        self
    }

    pub fn operation(&self, operation: &str, outcome: &str) {
        self.operations
            .get_or_create(&OperationLabels {
                operation: operation.into(),
                outcome: outcome.into(),
            })
            .inc();
    }

    pub fn sync_finished(&self, elapsed: Duration, ok: bool) {
        self.sync_runs.inc();
        if !ok {
            self.sync_failures.inc();
        }
        self.sync_duration.observe(elapsed.as_secs_f64());
    }
}
