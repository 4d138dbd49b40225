//! HNSW (Hierarchical Navigable Small World) Graph
//!
//! A multi-layer proximity graph for approximate nearest neighbor search.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: ●───────────────────● (few nodes, long jumps)
//!          │                   │
//! Layer 1: ●───────●─────●─────● (each is also in every layer below)
//!          │       │     │     │
//! Layer 0: ●─●─●─●─●─●─●─●─●─●─● (all nodes)
//! ```
//!
//! Nodes hold either a raw vector or a PQ code. Layers hold only node
//! handles plus adjacency, so a node's key and payload live in one place.

mod dot;
mod graph;
mod layer;
mod metric;
mod node;
mod search;
mod stats;
mod visited;

pub use graph::{Graph, GraphConfig, SearchResult};
pub use node::{InputNode, NodeData, NodeEntry, NodeId, VectorAccessor, VectorLoader};
pub use stats::{GraphStats, PerformanceStats};

pub(crate) use layer::Layer;
pub(crate) use node::NodeArena;
