use std::collections::BTreeMap;
use std::fmt::Write;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use ipnetwork::IpNetwork;

use crate::clock::grace_elapsed;
use crate::prefix;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

/// Result of a release request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The resource was freed.
    Released,
    /// The resource is held and its grace period has not elapsed yet.
    Pending,
    /// Nothing is held under this key.
    NotHeld,
}

impl ReleaseOutcome {
    pub fn is_released(self) -> bool {
        matches!(self, ReleaseOutcome::Released)
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) prefix: IpNetwork,
    pub(crate) acquired: bool,
    /// Buddy halves, present only once the block has been split.
    pub(crate) children: Option<(NodeId, NodeId)>,
    pub(crate) last_update: Instant,
    /// Leased addresses and their creation time. Only used on acquired leaves.
    pub(crate) leases: BTreeMap<IpAddr, Instant>,
    /// Last address handed out by `ip_acquire`.
    pub(crate) cursor: Option<IpAddr>,
}

impl Node {
    fn new(prefix: IpNetwork, now: Instant) -> Self {
        Self {
            prefix,
            acquired: false,
            children: None,
            last_update: now,
            leases: BTreeMap::new(),
            cursor: None,
        }
    }
}

/// Storage for the nodes of every root tree. Slots of merged nodes are
/// recycled.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
}

impl Arena {
    pub(crate) fn insert(&mut self, prefix: IpNetwork, now: Instant) -> NodeId {
        let node = Node::new(prefix, now);
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn remove(&mut self, id: NodeId) {
        if let Some((left, right)) = self.nodes[id.0].children.take() {
            self.remove(left);
            self.remove(right);
        }
        self.nodes[id.0].leases.clear();
        self.free.push(id);
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Number of live nodes across all trees.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn is_split(&self, id: NodeId) -> bool {
        self.node(id).children.is_some()
    }

    fn split(&mut self, id: NodeId, now: Instant) -> (NodeId, NodeId) {
        let (left, right) = prefix::split(&self.node(id).prefix);
        let left = self.insert(left, now);
        let right = self.insert(right, now);
        let node = self.node_mut(id);
        node.children = Some((left, right));
        node.last_update = now;
        (left, right)
    }

    /// Drops the halves below `id`, leaving it a leaf last touched at `stamp`.
    fn collapse(&mut self, id: NodeId, stamp: Instant) {
        if let Some((left, right)) = self.node_mut(id).children.take() {
            self.remove(left);
            self.remove(right);
        }
        self.node_mut(id).last_update = stamp;
    }

    /// No block at or below `id` is acquired.
    fn subtree_free(&self, id: NodeId) -> bool {
        let node = self.node(id);
        if node.acquired {
            return false;
        }
        match node.children {
            Some((left, right)) => self.subtree_free(left) && self.subtree_free(right),
            None => true,
        }
    }

    /// The child whose range contains `target`. `target` must lie strictly
    /// below the split node `id`.
    fn child_towards(&self, id: NodeId, target: &IpNetwork) -> Option<NodeId> {
        let (left, right) = self.node(id).children?;
        if prefix::is_child_of(&self.node(left).prefix, target) {
            Some(left)
        } else if prefix::is_child_of(&self.node(right).prefix, target) {
            Some(right)
        } else {
            None
        }
    }

    /// Children ordered so that an already split child is tried first, which
    /// keeps allocations packed together and large free blocks intact.
    fn best_direction(&self, left: NodeId, right: NodeId) -> (NodeId, NodeId) {
        if self.is_split(left) {
            (left, right)
        } else if self.is_split(right) {
            (right, left)
        } else {
            (left, right)
        }
    }

    fn acquire(&mut self, id: NodeId, now: Instant) -> Option<IpNetwork> {
        if self.is_split(id) {
            if !self.subtree_free(id) {
                return None;
            }
            // free halves that have not been merged yet
            self.collapse(id, now);
        }
        let node = self.node_mut(id);
        node.acquired = true;
        node.last_update = now;
        Some(node.prefix)
    }

    pub(crate) fn allocate_size(&mut self, id: NodeId, size: u8, now: Instant) -> Option<IpNetwork> {
        let node = self.node(id);
        if node.acquired || node.prefix.prefix() > size {
            return None;
        }
        if node.prefix.prefix() == size {
            return self.acquire(id, now);
        }

        let children = node.children;
        let (left, right) = match children {
            Some(children) => children,
            None => self.split(id, now),
        };
        let (first, second) = self.best_direction(left, right);
        self.allocate_size(first, size, now)
            .or_else(|| self.allocate_size(second, size, now))
    }

    pub(crate) fn allocate_exact(
        &mut self,
        id: NodeId,
        target: &IpNetwork,
        now: Instant,
    ) -> Option<IpNetwork> {
        let node = self.node(id);
        if node.acquired || !prefix::is_child_of(&node.prefix, target) {
            return None;
        }
        if prefix::same(&node.prefix, target) {
            return self.acquire(id, now);
        }

        if !self.is_split(id) {
            self.split(id, now);
        }
        let child = self.child_towards(id, target)?;
        self.allocate_exact(child, target, now)
    }

    pub(crate) fn release(
        &mut self,
        id: NodeId,
        target: &IpNetwork,
        grace: Duration,
        now: Instant,
    ) -> ReleaseOutcome {
        let node = self.node(id);
        if prefix::same(&node.prefix, target) {
            if !node.acquired {
                return ReleaseOutcome::NotHeld;
            }
            if !grace_elapsed(node.last_update, grace, now) {
                return ReleaseOutcome::Pending;
            }
            let node = self.node_mut(id);
            node.acquired = false;
            node.last_update = now;
            node.leases.clear();
            node.cursor = None;
            return ReleaseOutcome::Released;
        }

        let Some(child) = self.child_towards(id, target) else {
            return ReleaseOutcome::NotHeld;
        };
        let outcome = self.release(child, target, grace, now);
        self.merge(id, grace, now);
        outcome
    }

    /// Folds the two halves of `id` back into it when both are free leaves
    /// idle for at least `grace`.
    fn merge(&mut self, id: NodeId, grace: Duration, now: Instant) -> bool {
        let Some((left, right)) = self.node(id).children else {
            return false;
        };
        let mergeable = [left, right].iter().all(|child| {
            let child = self.node(*child);
            !child.acquired
                && child.children.is_none()
                && grace_elapsed(child.last_update, grace, now)
        });
        if mergeable {
            // the merged block has been idle as long as its younger half
            let stamp = self.node(left).last_update.max(self.node(right).last_update);
            self.collapse(id, stamp);
        }
        mergeable
    }

    /// Merges every idle buddy pair below `id`, bottom up.
    pub(crate) fn compact(&mut self, id: NodeId, grace: Duration, now: Instant) -> usize {
        let Some((left, right)) = self.node(id).children else {
            return 0;
        };
        let merged = self.compact(left, grace, now) + self.compact(right, grace, now);
        merged + usize::from(self.merge(id, grace, now))
    }

    pub(crate) fn is_available(&self, id: NodeId, target: &IpNetwork) -> bool {
        let node = self.node(id);
        if node.acquired {
            return false;
        }
        if prefix::same(&node.prefix, target) {
            return self.subtree_free(id);
        }
        match self.child_towards(id, target) {
            Some(child) => self.is_available(child, target),
            None => true,
        }
    }

    /// The node for exactly `target`, if that block is materialized.
    pub(crate) fn search(&self, id: NodeId, target: &IpNetwork) -> Option<NodeId> {
        if prefix::same(&self.node(id).prefix, target) {
            return Some(id);
        }
        let child = self.child_towards(id, target)?;
        self.search(child, target)
    }

    pub(crate) fn networks(&self, id: NodeId, out: &mut Vec<IpNetwork>) {
        let node = self.node(id);
        if node.acquired {
            out.push(node.prefix);
        }
        if let Some((left, right)) = node.children {
            self.networks(left, out);
            self.networks(right, out);
        }
    }

    /// Leases the next free address after the cursor, wrapping around the
    /// block. `id` must be an acquired node.
    pub(crate) fn ip_acquire(&mut self, id: NodeId, now: Instant) -> Option<IpAddr> {
        let node = self.node_mut(id);
        if node.leases.len() as u128 >= prefix::capacity(&node.prefix) {
            return None;
        }
        let mut addr = match node.cursor {
            Some(cursor) => prefix::next_in(&node.prefix, cursor),
            None => node.prefix.network(),
        };
        while node.leases.contains_key(&addr) {
            addr = prefix::next_in(&node.prefix, addr);
        }
        node.leases.insert(addr, now);
        node.cursor = Some(addr);
        Some(addr)
    }

    /// Leases `addr` unless it is already leased. `id` must be an acquired
    /// node containing `addr`.
    pub(crate) fn ip_acquire_with_addr(
        &mut self,
        id: NodeId,
        addr: IpAddr,
        now: Instant,
    ) -> Option<IpAddr> {
        let node = self.node_mut(id);
        if node.leases.contains_key(&addr) {
            return None;
        }
        node.leases.insert(addr, now);
        Some(addr)
    }

    pub(crate) fn ip_release(
        &mut self,
        id: NodeId,
        addr: IpAddr,
        grace: Duration,
        now: Instant,
    ) -> ReleaseOutcome {
        let node = self.node_mut(id);
        match node.leases.get(&addr).copied() {
            None => ReleaseOutcome::NotHeld,
            Some(created) if !grace_elapsed(created, grace, now) => ReleaseOutcome::Pending,
            Some(_) => {
                node.leases.remove(&addr);
                ReleaseOutcome::Released
            }
        }
    }

    pub(crate) fn write_dot(&self, id: NodeId, out: &mut String) -> std::fmt::Result {
        let node = self.node(id);
        let color = if node.acquired { "lightcoral" } else { "lightgreen" };
        let label = if node.leases.is_empty() {
            node.prefix.to_string()
        } else {
            format!("{}\\n{} leased", node.prefix, node.leases.len())
        };
        writeln!(
            out,
            "  \"{}\" [label=\"{}\" style=filled fillcolor={}];",
            node.prefix, label, color
        )?;
        if let Some((left, right)) = node.children {
            for child in [left, right] {
                writeln!(out, "  \"{}\" -> \"{}\";", node.prefix, self.node(child).prefix)?;
                self.write_dot(child, out)?;
            }
        }
        Ok(())
    }
}
