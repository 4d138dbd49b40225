//! Distance dispatch between nodes and queries
//!
//! | left            | right      | path                                   |
//! |-----------------|------------|----------------------------------------|
//! | query           | standard   | raw distance                           |
//! | query           | PQ         | asymmetric, through a per-query table  |
//! | standard        | standard   | raw distance                           |
//! | PQ              | PQ         | symmetric code distance                |
//! | standard        | PQ         | abort: the two are not comparable      |

use super::node::{NodeArena, NodeData, NodeId};
use super::stats::PerformanceCounters;
use crate::distance::DistanceKind;
use crate::error::{HnswError, Result};
use crate::key::Key;
use crate::pq::{DistanceTable, DotProductTable, Quantizer};

enum QueryTable {
    Euclidean(DistanceTable),
    Cosine(DotProductTable),
}

/// Query vector plus whatever per-query tables the graph's mode needs
pub(crate) struct PreparedQuery {
    raw: Vec<f32>,
    table: Option<QueryTable>,
}

/// Borrowed view of everything needed to compute distances
pub(crate) struct Metric<'a, K> {
    arena: &'a NodeArena<K>,
    kind: DistanceKind,
    quantizer: Option<&'a Quantizer>,
    counters: &'a PerformanceCounters,
}

impl<'a, K: Key> Metric<'a, K> {
    pub fn new(
        arena: &'a NodeArena<K>,
        kind: DistanceKind,
        quantizer: Option<&'a Quantizer>,
        counters: &'a PerformanceCounters,
    ) -> Self {
        Self {
            arena,
            kind,
            quantizer,
            counters,
        }
    }

    pub fn arena(&self) -> &'a NodeArena<K> {
        self.arena
    }

    pub fn counters(&self) -> &'a PerformanceCounters {
        self.counters
    }

    pub fn prepare(&self, query: &[f32]) -> Result<PreparedQuery> {
        let table = match self.quantizer {
            Some(q) => {
                let q64: Vec<f64> = query.iter().map(|&x| x as f64).collect();
                Some(match self.kind {
                    DistanceKind::Euclidean => QueryTable::Euclidean(q.compute_distance_table(&q64)?),
                    DistanceKind::Cosine => QueryTable::Cosine(q.compute_dot_product_table(&q64)?),
                })
            }
            None => None,
        };
        Ok(PreparedQuery {
            raw: query.to_vec(),
            table,
        })
    }

    /// Distance from a prepared query to node `id`
    pub fn to_query(&self, query: &PreparedQuery, id: NodeId) -> Result<f64> {
        self.counters.record_distance();
        let entry = &self.arena[id];
        match entry.data() {
            NodeData::Standard(accessor) => {
                let v = accessor.load_exact(entry.key(), query.raw.len())?;
                Ok(self.kind.distance(&query.raw, &v))
            }
            NodeData::Pq(code) => {
                let (Some(q), Some(table)) = (self.quantizer, query.table.as_ref()) else {
                    return Err(HnswError::State(format!(
                        "node {:?} is PQ-encoded but the graph has no quantizer",
                        entry.key()
                    )));
                };
                let d = match table {
                    QueryTable::Euclidean(t) => q.asymmetric_distance_with_table(t, code)?,
                    QueryTable::Cosine(t) => q.asymmetric_cosine_distance_with_table(t, code)?,
                };
                Ok(d)
            }
        }
    }

    /// Distance between two stored nodes
    ///
    /// # Panics
    /// Panics when one node is PQ-encoded and the other is not.
    pub fn between(&self, a: NodeId, b: NodeId) -> Result<f64> {
        self.counters.record_distance();
        let (ea, eb) = (&self.arena[a], &self.arena[b]);
        match (ea.data(), eb.data()) {
            (NodeData::Standard(va), NodeData::Standard(vb)) => {
                let va = va.load(ea.key())?;
                let vb = vb.load_exact(eb.key(), va.len())?;
                Ok(self.kind.distance(&va, &vb))
            }
            (NodeData::Pq(ca), NodeData::Pq(cb)) => {
                let Some(q) = self.quantizer else {
                    return Err(HnswError::State(
                        "PQ nodes present but the graph has no quantizer".into(),
                    ));
                };
                let d = match self.kind {
                    DistanceKind::Euclidean => q.symmetric_distance(ca, cb)?,
                    DistanceKind::Cosine => q.symmetric_cosine_distance(ca, cb)?,
                };
                Ok(d)
            }
            _ => panic!(
                "cannot compare PQ and standard nodes ({:?}, {:?}): approximate and exact distances are not comparable",
                ea.key(),
                eb.key()
            ),
        }
    }
}
