use std::fmt::Write;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use ipnetwork::IpNetwork;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::node::{Arena, NodeId, ReleaseOutcome};
use crate::prefix::{self, Family};
use crate::{Error, Result};

/// Allocator over a fixed set of non-overlapping pools.
///
/// Not synchronized; callers share it behind a lock.
pub struct Ipam {
    arena: Arena,
    roots: Vec<NodeId>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Ipam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ipam")
            .field("pools", &self.pools())
            .field("nodes", &self.arena.len())
            .finish()
    }
}

impl Ipam {
    pub fn new(pools: impl IntoIterator<Item = IpNetwork>) -> Result<Self> {
        Self::with_clock(pools, Arc::new(SystemClock))
    }

    pub fn with_clock(
        pools: impl IntoIterator<Item = IpNetwork>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pools: Vec<IpNetwork> = pools.into_iter().collect();
        for (i, pool) in pools.iter().enumerate() {
            prefix::validate(pool)?;
            if let Some(other) = pools[..i].iter().find(|other| prefix::overlaps(other, pool)) {
                return Err(Error::OverlappingPools(*other, *pool));
            }
        }

        let now = clock.now();
        let mut arena = Arena::default();
        let roots = pools.into_iter().map(|pool| arena.insert(pool, now)).collect();
        Ok(Self {
            arena,
            roots,
            clock,
        })
    }

    /// Configured pools in configuration order.
    pub fn pools(&self) -> Vec<IpNetwork> {
        self.roots
            .iter()
            .map(|root| self.arena.node(*root).prefix)
            .collect()
    }

    /// The pool containing `network`, if any.
    pub fn owning_pool(&self, network: &IpNetwork) -> Option<IpNetwork> {
        self.root_for(network)
            .ok()
            .map(|root| self.arena.node(root).prefix)
    }

    fn root_for(&self, network: &IpNetwork) -> Result<NodeId> {
        self.roots
            .iter()
            .copied()
            .find(|root| prefix::is_child_of(&self.arena.node(*root).prefix, network))
            .ok_or(Error::NoSuitablePool(*network))
    }

    /// Allocates a free network with mask length `size` from the first pool
    /// of `family` that has room. `Ok(None)` means every candidate pool is
    /// exhausted.
    pub fn network_acquire(&mut self, family: Family, size: u8) -> Result<Option<IpNetwork>> {
        if size > family.max_prefix() {
            return Err(Error::InvalidPrefixLength { family, size });
        }
        let candidates: Vec<NodeId> = self
            .roots
            .iter()
            .copied()
            .filter(|root| {
                let pool = self.arena.node(*root).prefix;
                Family::of(&pool) == family && pool.prefix() <= size
            })
            .collect();
        if candidates.is_empty() {
            return Err(Error::NoPoolForSize { family, size });
        }

        let now = self.clock.now();
        for root in candidates {
            if let Some(network) = self.arena.allocate_size(root, size, now) {
                debug!(%network, "acquired network");
                return Ok(Some(network));
            }
        }
        Ok(None)
    }

    /// Allocates exactly `network`. `Ok(None)` means it overlaps a network
    /// that is already held.
    pub fn network_acquire_with_prefix(&mut self, network: IpNetwork) -> Result<Option<IpNetwork>> {
        prefix::validate(&network)?;
        let root = self.root_for(&network)?;
        let acquired = self.arena.allocate_exact(root, &network, self.clock.now());
        if acquired.is_some() {
            debug!(%network, "acquired network");
        }
        Ok(acquired)
    }

    /// Releases `network` once it has been held for at least `grace`.
    /// Releasing drops every lease inside it.
    pub fn network_release(&mut self, network: IpNetwork, grace: Duration) -> Result<ReleaseOutcome> {
        prefix::validate(&network)?;
        let root = self.root_for(&network)?;
        let outcome = self.arena.release(root, &network, grace, self.clock.now());
        debug!(%network, ?outcome, "network release");
        Ok(outcome)
    }

    /// Whether `network` could be acquired right now.
    pub fn network_is_available(&self, network: &IpNetwork) -> Result<bool> {
        prefix::validate(network)?;
        let root = self.root_for(network)?;
        Ok(self.arena.is_available(root, network))
    }

    pub fn network_is_acquired(&self, network: &IpNetwork) -> bool {
        self.acquired_node(network).is_ok()
    }

    /// Every acquired network, pools in configuration order and addresses
    /// ascending within a pool.
    pub fn list_networks(&self) -> Vec<IpNetwork> {
        let mut out = Vec::new();
        for root in &self.roots {
            self.arena.networks(*root, &mut out);
        }
        out
    }

    fn acquired_node(&self, network: &IpNetwork) -> Result<NodeId> {
        let root = self.root_for(network)?;
        self.arena
            .search(root, network)
            .filter(|id| self.arena.node(*id).acquired)
            .ok_or(Error::NetworkNotAcquired(*network))
    }

    /// Leases the next free address of an acquired network. `Ok(None)`
    /// means every address is leased.
    pub fn ip_acquire(&mut self, network: &IpNetwork) -> Result<Option<IpAddr>> {
        let id = self.acquired_node(network)?;
        let addr = self.arena.ip_acquire(id, self.clock.now());
        trace!(%network, ?addr, "ip acquire");
        Ok(addr)
    }

    /// Leases `addr` in an acquired network. `Ok(None)` means it is already
    /// leased.
    pub fn ip_acquire_with_addr(
        &mut self,
        network: &IpNetwork,
        addr: IpAddr,
    ) -> Result<Option<IpAddr>> {
        let id = self.acquired_node(network)?;
        if !network.contains(addr) {
            return Err(Error::AddressOutOfNetwork {
                addr,
                network: *network,
            });
        }
        let leased = self.arena.ip_acquire_with_addr(id, addr, self.clock.now());
        trace!(%network, %addr, leased = leased.is_some(), "ip acquire");
        Ok(leased)
    }

    /// Releases the lease on `addr` once it is at least `grace` old. A
    /// network that is not held has no leases, so this reports `NotHeld`.
    pub fn ip_release(
        &mut self,
        network: &IpNetwork,
        addr: IpAddr,
        grace: Duration,
    ) -> Result<ReleaseOutcome> {
        let id = match self.acquired_node(network) {
            Ok(id) => id,
            Err(Error::NetworkNotAcquired(_)) => return Ok(ReleaseOutcome::NotHeld),
            Err(e) => return Err(e),
        };
        let outcome = self.arena.ip_release(id, addr, grace, self.clock.now());
        trace!(%network, %addr, ?outcome, "ip release");
        Ok(outcome)
    }

    pub fn ip_is_leased(&self, network: &IpNetwork, addr: IpAddr) -> bool {
        self.acquired_node(network)
            .is_ok_and(|id| self.arena.node(id).leases.contains_key(&addr))
    }

    /// Leased addresses of an acquired network in ascending order.
    pub fn list_ips(&self, network: &IpNetwork) -> Result<Vec<IpAddr>> {
        let id = self.acquired_node(network)?;
        Ok(self.arena.node(id).leases.keys().copied().collect())
    }

    /// Merges every buddy pair whose halves are free and idle for `grace`.
    /// Returns the number of merges.
    pub fn compact(&mut self, grace: Duration) -> usize {
        let now = self.clock.now();
        let merged = self
            .roots
            .iter()
            .map(|root| self.arena.compact(*root, grace, now))
            .sum();
        if merged > 0 {
            debug!(merged, nodes = self.arena.len(), "compacted pools");
        }
        merged
    }

    /// Resident tree nodes across all pools.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Graphviz rendering of every pool tree.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph ipam {\n");
        for root in &self.roots {
            // writing into a String cannot fail
            let _ = self.arena.write_dot(*root, &mut out);
        }
        let _ = writeln!(out, "}}");
        out
    }
}
