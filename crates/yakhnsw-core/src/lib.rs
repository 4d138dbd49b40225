//! YakHNSW Core – HNSW graph, Product Quantization, and binary persistence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        GraphWrapper (single dispatcher, shared reads)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │   HNSW Graph · Insert · Filtered Search · Delete + Repair   │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  Product Quantization (ADC)  │ YAKHNSW codec · Stream codec │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```

pub mod distance;
pub mod error;
pub mod heap;
pub mod hnsw;
pub mod key;
pub mod persist;
pub mod pq;
pub mod wrapper;

pub use distance::DistanceKind;
pub use error::{HnswError, LoadError, Result};
pub use hnsw::{Graph, GraphConfig, InputNode, SearchResult, VectorLoader};
pub use key::{GraphKey, Key};
pub use persist::Persistent;
pub use pq::{Codebook, Quantizer, TrainingConfig};
pub use wrapper::GraphWrapper;
