//! Graph statistics
//!
//! Two kinds: a structural snapshot computed on demand ([`GraphStats`]) and
//! running operation counters kept per graph ([`PerformanceStats`]).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Structural summary of a graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    /// Nodes in layer 0
    pub num_nodes: usize,
    /// Node count of every layer, bottom first
    pub layer_sizes: Vec<usize>,
    /// Directed edges summed over all layers
    pub total_edges: usize,
    /// Mean out-degree in layer 0
    pub avg_degree: f64,
    pub max_degree: usize,
    pub dims: usize,
    pub pq_enabled: bool,
}

/// Snapshot of the operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceStats {
    pub distance_calculations: u64,
    /// Edges created by insertion and repair
    pub neighbor_connections: u64,
    /// Neighbors evicted for exceeding the degree cap
    pub graph_restructures: u64,
    /// Edges added while replenishing a deficient node
    pub cascade_updates: u64,
}

/// Running counters, updated through shared references during search
#[derive(Debug, Default)]
pub(crate) struct PerformanceCounters {
    distance_calculations: AtomicU64,
    neighbor_connections: AtomicU64,
    graph_restructures: AtomicU64,
    cascade_updates: AtomicU64,
}

impl PerformanceCounters {
    #[inline]
    pub fn record_distance(&self) {
        self.distance_calculations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection(&self) {
        self.neighbor_connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_restructure(&self) {
        self.graph_restructures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cascade(&self) {
        self.cascade_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerformanceStats {
        PerformanceStats {
            distance_calculations: self.distance_calculations.load(Ordering::Relaxed),
            neighbor_connections: self.neighbor_connections.load(Ordering::Relaxed),
            graph_restructures: self.graph_restructures.load(Ordering::Relaxed),
            cascade_updates: self.cascade_updates.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.distance_calculations.store(0, Ordering::Relaxed);
        self.neighbor_connections.store(0, Ordering::Relaxed);
        self.graph_restructures.store(0, Ordering::Relaxed);
        self.cascade_updates.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot_and_reset() {
        let counters = PerformanceCounters::default();
        counters.record_distance();
        counters.record_distance();
        counters.record_connection();
        counters.record_restructure();
        counters.record_cascade();

        let snap = counters.snapshot();
        assert_eq!(snap.distance_calculations, 2);
        assert_eq!(snap.neighbor_connections, 1);
        assert_eq!(snap.graph_restructures, 1);
        assert_eq!(snap.cascade_updates, 1);

        counters.reset();
        assert_eq!(counters.snapshot(), PerformanceStats::default());
    }
}
