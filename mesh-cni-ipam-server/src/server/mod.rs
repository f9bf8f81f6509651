//! Cache overlay between the API and the allocator.
//!
//! The allocator only lives in memory; the cluster's resources are the
//! source of truth. On startup the overlay replays the declared networks
//! and addresses, and every sync pass reconciles the two again.

pub(crate) mod parse;
pub(crate) mod preallocation;

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ipnetwork::IpNetwork;
use mesh_cni_ipam::{Family, Ipam, ReleaseOutcome};
use tracing::{debug, error, info, warn};

use crate::desired::DesiredState;
use crate::metrics::IpamMetrics;
use crate::{Error, Result};
use parse::{parse_ip, parse_network};
use preallocation::preallocate;

/// Counts from one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub networks_acquired: usize,
    pub networks_released: usize,
    pub networks_deferred: usize,
    pub ips_acquired: usize,
    pub ips_released: usize,
    pub ips_deferred: usize,
    pub merged: usize,
}

impl SyncReport {
    fn count_network_release(&mut self, outcome: ReleaseOutcome) {
        match outcome {
            ReleaseOutcome::Released => self.networks_released += 1,
            ReleaseOutcome::Pending => self.networks_deferred += 1,
            ReleaseOutcome::NotHeld => {}
        }
    }

    fn count_ip_release(&mut self, outcome: ReleaseOutcome) {
        match outcome {
            ReleaseOutcome::Released => self.ips_released += 1,
            ReleaseOutcome::Pending => self.ips_deferred += 1,
            ReleaseOutcome::NotHeld => {}
        }
    }
}

struct Shared {
    ipam: Mutex<Ipam>,
    grace_period: Duration,
    metrics: IpamMetrics,
}

/// Shared handle to the allocator. Every operation holds the allocator lock
/// for its full duration and never awaits while holding it.
#[derive(Clone)]
pub struct IpamServer {
    shared: Arc<Shared>,
}

impl IpamServer {
    pub fn new(ipam: Ipam, grace_period: Duration, metrics: IpamMetrics) -> Self {
        Self {
            shared: Arc::new(Shared {
                ipam: Mutex::new(ipam),
                grace_period,
                metrics,
            }),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.shared.grace_period
    }

    pub fn metrics(&self) -> &IpamMetrics {
        &self.shared.metrics
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ipam>> {
        self.shared.ipam.lock().map_err(|_| Error::LockPoisoned)
    }

    fn observe<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind().label(),
        };
        self.shared.metrics.operation(operation, outcome);
        result
    }

    /// Acquires `cidr`. An immutable request only accepts that exact
    /// network; otherwise a free network of the same size is handed out
    /// when the exact one is taken. The leading `pre_allocated` addresses
    /// are leased before returning, and the network is given back if that
    /// fails.
    pub fn network_acquire(
        &self,
        cidr: &str,
        immutable: bool,
        pre_allocated: u32,
    ) -> Result<IpNetwork> {
        let result = self.try_network_acquire(cidr, immutable, pre_allocated);
        self.observe("network_acquire", result)
    }

    fn try_network_acquire(
        &self,
        cidr: &str,
        immutable: bool,
        pre_allocated: u32,
    ) -> Result<IpNetwork> {
        let requested = parse_network(cidr)?;
        let mut ipam = self.lock()?;
        ensure_in_pool(&ipam, &requested)?;

        let network = match ipam.network_acquire_with_prefix(requested)? {
            Some(network) => network,
            None if immutable => return Err(Error::NetworkConflict(requested)),
            None => {
                let size = requested.prefix();
                let network = ipam
                    .network_acquire(Family::of(&requested), size)?
                    .ok_or_else(|| Error::Exhausted(format!("no free /{size} network")))?;
                warn!(%requested, %network, "requested network is taken, remapped");
                network
            }
        };

        if let Err(e) = preallocate(&mut ipam, &network, pre_allocated) {
            match ipam.network_release(network, Duration::ZERO) {
                Ok(_) => warn!(%network, %e, "preallocation failed, network released"),
                Err(rollback) => {
                    error!(%network, %e, %rollback, "preallocation failed and rollback failed")
                }
            }
            return Err(e);
        }
        info!(%network, pre_allocated, "network acquired");
        Ok(network)
    }

    /// Releases `cidr` once its grace period has passed. Releasing a free
    /// network succeeds.
    pub fn network_release(&self, cidr: &str) -> Result<ReleaseOutcome> {
        let result = self.try_network_release(cidr);
        self.observe("network_release", result)
    }

    fn try_network_release(&self, cidr: &str) -> Result<ReleaseOutcome> {
        let network = parse_network(cidr)?;
        let mut ipam = self.lock()?;
        ensure_in_pool(&ipam, &network)?;
        let outcome = ipam.network_release(network, self.shared.grace_period)?;
        match outcome {
            ReleaseOutcome::Released => info!(%network, "network released"),
            ReleaseOutcome::Pending => warn!(%network, "network release deferred"),
            ReleaseOutcome::NotHeld => debug!(%network, "network was not held"),
        }
        Ok(outcome)
    }

    pub fn network_is_available(&self, cidr: &str) -> Result<bool> {
        let result = self.try_network_is_available(cidr);
        self.observe("network_is_available", result)
    }

    fn try_network_is_available(&self, cidr: &str) -> Result<bool> {
        let network = parse_network(cidr)?;
        let ipam = self.lock()?;
        ensure_in_pool(&ipam, &network)?;
        Ok(ipam.network_is_available(&network)?)
    }

    /// Leases `ip` in `cidr`, or the next free address when `ip` is unset.
    pub fn ip_acquire(&self, cidr: &str, ip: Option<&str>) -> Result<IpAddr> {
        let result = self.try_ip_acquire(cidr, ip);
        self.observe("ip_acquire", result)
    }

    fn try_ip_acquire(&self, cidr: &str, ip: Option<&str>) -> Result<IpAddr> {
        let network = parse_network(cidr)?;
        let addr = ip.map(parse_ip).transpose()?;
        let mut ipam = self.lock()?;
        ensure_in_pool(&ipam, &network)?;
        let leased = match addr {
            Some(addr) => ipam
                .ip_acquire_with_addr(&network, addr)?
                .ok_or(Error::AddressConflict { addr, network })?,
            None => ipam
                .ip_acquire(&network)?
                .ok_or_else(|| Error::Exhausted(format!("no free address in {network}")))?,
        };
        debug!(%network, ip = %leased, "ip acquired");
        Ok(leased)
    }

    /// Releases `ip` in `cidr` once its grace period has passed. Releasing
    /// an address that is not leased succeeds.
    pub fn ip_release(&self, cidr: &str, ip: &str) -> Result<ReleaseOutcome> {
        let result = self.try_ip_release(cidr, ip);
        self.observe("ip_release", result)
    }

    fn try_ip_release(&self, cidr: &str, ip: &str) -> Result<ReleaseOutcome> {
        let network = parse_network(cidr)?;
        let addr = parse_ip(ip)?;
        let mut ipam = self.lock()?;
        ensure_in_pool(&ipam, &network)?;
        let outcome = ipam.ip_release(&network, addr, self.shared.grace_period)?;
        if outcome == ReleaseOutcome::Pending {
            warn!(%network, ip = %addr, "ip release deferred");
        }
        Ok(outcome)
    }

    pub fn list_networks(&self) -> Result<Vec<IpNetwork>> {
        Ok(self.lock()?.list_networks())
    }

    pub fn list_ips(&self, cidr: &str) -> Result<Vec<IpAddr>> {
        let network = parse_network(cidr)?;
        let ipam = self.lock()?;
        ensure_in_pool(&ipam, &network)?;
        Ok(ipam.list_ips(&network)?)
    }

    /// Graphviz rendering of the pool trees.
    pub fn to_dot(&self) -> Result<String> {
        Ok(self.lock()?.to_dot())
    }

    pub fn node_count(&self) -> Result<usize> {
        Ok(self.lock()?.node_count())
    }

    /// Replays the declared state into an empty allocator. Any declaration
    /// that cannot be honored is an error.
    pub fn initialize(&self, desired: &DesiredState) -> Result<()> {
        let mut ipam = self.lock()?;
        let mut report = SyncReport::default();
        acquire_declared(&mut ipam, desired, &mut report)?;
        info!(
            networks = report.networks_acquired,
            ips = report.ips_acquired,
            "restored declared state"
        );
        Ok(())
    }

    /// Reconciles the allocator with `desired`: declared resources that are
    /// missing are acquired, held resources that are no longer declared are
    /// released with the grace period. Leases in the preallocated head of a
    /// declared network are kept.
    pub fn sync(&self, desired: &DesiredState) -> Result<SyncReport> {
        let grace = self.shared.grace_period;
        let mut ipam = self.lock()?;
        let mut report = SyncReport::default();

        acquire_declared(&mut ipam, desired, &mut report)?;

        for network in ipam.list_networks() {
            for addr in ipam.list_ips(&network)? {
                if desired.declares_ip(&network, addr) || desired.is_preallocated(&network, addr) {
                    continue;
                }
                let outcome = ipam.ip_release(&network, addr, grace)?;
                debug!(%network, ip = %addr, ?outcome, "releasing undeclared ip");
                report.count_ip_release(outcome);
            }
        }

        for network in ipam.list_networks() {
            if desired.networks.contains_key(&network) {
                continue;
            }
            let outcome = ipam.network_release(network, grace)?;
            debug!(%network, ?outcome, "releasing undeclared network");
            report.count_network_release(outcome);
        }

        report.merged = ipam.compact(grace);
        Ok(report)
    }
}

fn ensure_in_pool(ipam: &Ipam, network: &IpNetwork) -> Result<()> {
    ipam.owning_pool(network)
        .map(|_| ())
        .ok_or(Error::OutOfPool(*network))
}

/// Acquire pass shared by startup and sync: every declared network at its
/// exact prefix with its preallocation, then every declared address.
fn acquire_declared(
    ipam: &mut Ipam,
    desired: &DesiredState,
    report: &mut SyncReport,
) -> Result<()> {
    let mut networks: Vec<(&IpNetwork, &u32)> = desired.networks.iter().collect();
    networks.sort_by_key(|(network, _)| (network.network(), network.prefix()));
    for (network, pre_allocated) in networks {
        ensure_in_pool(ipam, network)?;
        if !ipam.network_is_acquired(network) {
            ipam.network_acquire_with_prefix(*network)?
                .ok_or(Error::NetworkConflict(*network))?;
            debug!(%network, "acquired declared network");
            report.networks_acquired += 1;
        }
        report.ips_acquired += preallocate(ipam, network, *pre_allocated)?;
    }

    let mut ips: Vec<(&IpAddr, &IpNetwork)> = desired.ips.iter().collect();
    ips.sort_by_key(|(addr, _)| **addr);
    for (addr, network) in ips {
        if ipam.ip_is_leased(network, *addr) {
            continue;
        }
        ensure_in_pool(ipam, network)?;
        ipam.ip_acquire_with_addr(network, *addr)?
            .ok_or(Error::AddressConflict {
                addr: *addr,
                network: *network,
            })?;
        debug!(%network, ip = %addr, "acquired declared ip");
        report.ips_acquired += 1;
    }
    Ok(())
}
