//! One level of the hierarchy
//!
//! Each member keeps its outgoing neighbor set and the set of members that
//! point at it, so removing a node never leaves a dangling edge behind.
//!
//! ```text
//!   add_neighbor(a, b):   a ──▶ b           (degree(a) > M ⇒ evict a's worst w,
//!                                             drop w ──▶ a, replenish(w))
//!   replenish(n):         n ──▶ (neighbors of n's neighbors) until degree = M
//! ```

use std::collections::{BTreeMap, BTreeSet};

use super::metric::Metric;
use super::node::NodeId;
use crate::error::{HnswError, Result};
use crate::key::Key;

#[derive(Debug, Clone, Default)]
pub(crate) struct LayerNode {
    neighbors: BTreeSet<NodeId>,
    referrers: BTreeSet<NodeId>,
}

/// Members of one layer and their adjacency
#[derive(Debug, Clone, Default)]
pub(crate) struct Layer {
    nodes: BTreeMap<NodeId, LayerNode>,
}

impl Layer {
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Any member, used to start a search when no elevator applies
    pub fn entry(&self) -> Option<NodeId> {
        self.nodes.keys().next().copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Add `id` without edges; returns false if already a member
    pub fn insert(&mut self, id: NodeId) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        self.nodes.insert(id, LayerNode::default());
        true
    }

    pub fn neighbors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .get(&id)
            .into_iter()
            .flat_map(|n| n.neighbors.iter().copied())
    }

    pub fn degree(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |n| n.neighbors.len())
    }

    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.nodes
            .get(&from)
            .is_some_and(|n| n.neighbors.contains(&to))
    }

    /// Create the directed edge `from ──▶ to`; false if it existed or either end is missing
    pub fn link(&mut self, from: NodeId, to: NodeId) -> bool {
        if from == to || !self.nodes.contains_key(&to) {
            return false;
        }
        let inserted = match self.nodes.get_mut(&from) {
            Some(node) => node.neighbors.insert(to),
            None => return false,
        };
        if inserted {
            if let Some(target) = self.nodes.get_mut(&to) {
                target.referrers.insert(from);
            }
        }
        inserted
    }

    pub fn unlink(&mut self, from: NodeId, to: NodeId) -> bool {
        let removed = self
            .nodes
            .get_mut(&from)
            .is_some_and(|node| node.neighbors.remove(&to));
        if removed {
            if let Some(target) = self.nodes.get_mut(&to) {
                target.referrers.remove(&from);
            }
        }
        removed
    }

    /// Add `candidate` to `node`'s neighbors, evicting the furthest neighbor
    /// when the degree exceeds `m`
    pub fn add_neighbor<K: Key>(
        &mut self,
        node: NodeId,
        candidate: NodeId,
        m: usize,
        metric: &Metric<'_, K>,
    ) -> Result<()> {
        if !self.link(node, candidate) {
            return Ok(());
        }
        metric.counters().record_connection();

        if self.degree(node) <= m {
            return Ok(());
        }

        // The degree cap must hold even when a distance cannot be computed
        let worst = match self.furthest_neighbor(node, metric) {
            Ok(worst) => worst,
            Err(e) => {
                self.unlink(node, candidate);
                return Err(e);
            }
        };

        if let Some(evicted) = worst {
            self.unlink(node, evicted);
            self.unlink(evicted, node);
            metric.counters().record_restructure();
            self.replenish(evicted, m, metric)?;
        }
        Ok(())
    }

    fn furthest_neighbor<K: Key>(&self, node: NodeId, metric: &Metric<'_, K>) -> Result<Option<NodeId>> {
        let mut worst: Option<(NodeId, f64)> = None;
        for neighbor in self.neighbors(node) {
            let d = metric.between(node, neighbor)?;
            if worst.map_or(true, |(_, wd)| d > wd) {
                worst = Some((neighbor, d));
            }
        }
        Ok(worst.map(|(id, _)| id))
    }

    /// Borrow neighbors-of-neighbors until `node` is back at `m` or candidates run out
    pub fn replenish<K: Key>(&mut self, node: NodeId, m: usize, metric: &Metric<'_, K>) -> Result<()> {
        if !self.contains(node) || self.degree(node) >= m {
            return Ok(());
        }

        let current: Vec<NodeId> = self.neighbors(node).collect();
        for neighbor in current {
            let candidates: Vec<NodeId> = self.neighbors(neighbor).collect();
            for candidate in candidates {
                if candidate == node || self.has_edge(node, candidate) {
                    continue;
                }
                self.add_neighbor(node, candidate, m, metric)?;
                metric.counters().record_cascade();
                if self.degree(node) >= m {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Remove `id` and every edge touching it
    ///
    /// # Returns
    /// The former neighbors and referrers, which may now be under-connected.
    pub fn detach(&mut self, id: NodeId) -> Vec<NodeId> {
        let Some(removed) = self.nodes.remove(&id) else {
            return Vec::new();
        };
        for &neighbor in &removed.neighbors {
            if let Some(n) = self.nodes.get_mut(&neighbor) {
                n.referrers.remove(&id);
            }
        }
        for &referrer in &removed.referrers {
            if let Some(n) = self.nodes.get_mut(&referrer) {
                n.neighbors.remove(&id);
            }
        }
        let affected: BTreeSet<NodeId> = removed
            .neighbors
            .union(&removed.referrers)
            .copied()
            .collect();
        affected.into_iter().collect()
    }

    /// Detach `id`, then repair every node that lost an edge
    ///
    /// Repair is best-effort: a failed replenish leaves that node
    /// under-connected and the remaining nodes are still repaired.
    ///
    /// # Returns
    /// The errors of the repairs that failed
    pub fn isolate<K: Key>(&mut self, id: NodeId, m: usize, metric: &Metric<'_, K>) -> Vec<HnswError> {
        self.detach(id)
            .into_iter()
            .filter_map(|affected| self.replenish(affected, m, metric).err())
            .collect()
    }
}
