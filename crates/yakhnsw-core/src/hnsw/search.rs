//! Bounded beam search over one layer

use super::layer::Layer;
use super::node::{NodeArena, NodeId};
use super::visited::VisitedGuard;
use crate::error::Result;
use crate::heap::{Heap, Lessable};
use crate::key::Key;

/// Node paired with its distance to the search target
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub id: NodeId,
    pub distance: f64,
}

impl Lessable for Candidate {
    #[inline]
    fn less(&self, other: &Self) -> bool {
        self.distance < other.distance
    }
}

/// Beam search from `entry` for the `k` members closest to the target
///
/// `candidates` is bounded by `ef` and `result` by `k`. Nodes rejected by
/// `accept` are still expanded but never enter `result`. The loop stops once
/// a whole expansion round fails to improve the closest result and `result`
/// is full.
///
/// # Returns
/// Up to `k` candidates, closest first
pub(crate) fn search_layer<K, D>(
    layer: &Layer,
    arena: &NodeArena<K>,
    entry: Option<NodeId>,
    k: usize,
    ef: usize,
    mut distance: D,
    accept: Option<&dyn Fn(NodeId) -> bool>,
) -> Result<Vec<Candidate>>
where
    K: Key,
    D: FnMut(NodeId) -> Result<f64>,
{
    let Some(entry) = entry else {
        tracing::error!("beam search started without an entry node");
        return Ok(Vec::new());
    };
    if k == 0 {
        return Ok(Vec::new());
    }
    let ef = ef.max(1);
    let accepts = |id: NodeId| accept.map_or(true, |f| f(id));

    let mut visited = VisitedGuard::new(arena.capacity());
    let mut candidates: Heap<Candidate> = Heap::with_capacity(ef + 1);
    let mut result: Heap<Candidate> = Heap::with_capacity(k + 1);

    let start = Candidate {
        id: entry,
        distance: distance(entry)?,
    };
    visited.insert(entry.index());
    candidates.push(start);
    if accepts(entry) {
        result.push(start);
    }

    let mut neighbors: Vec<NodeId> = Vec::new();
    while let Some(current) = candidates.pop() {
        let mut improved = false;

        neighbors.clear();
        neighbors.extend(layer.neighbors(current.id));
        neighbors.sort_by(|a, b| arena[*a].key().cmp(arena[*b].key()));

        for &neighbor in &neighbors {
            if !visited.insert(neighbor.index()) {
                continue;
            }
            let found = Candidate {
                id: neighbor,
                distance: distance(neighbor)?,
            };

            if accepts(neighbor) {
                improved |= result.min().map_or(true, |best| found.distance < best.distance);
                if result.len() < k {
                    result.push(found);
                } else if result.max().is_some_and(|worst| found.distance < worst.distance) {
                    result.pop_last();
                    result.push(found);
                }
            }

            candidates.push(found);
            if candidates.len() > ef {
                candidates.pop_last();
            }
        }

        if !improved && result.len() >= k {
            break;
        }
    }

    Ok(result.into_sorted_vec())
}
