//! YakHNSW: approximate nearest-neighbor search over a layered graph
//!
//! The engine lives in `yakhnsw-core`; this crate re-exports it and ships the
//! `yakhnsw` command-line tool.
//!
//! ```no_run
//! use yakhnsw::{Graph, GraphConfig};
//!
//! let mut graph: Graph<String> = Graph::new(GraphConfig::default())?;
//! graph.insert("a".into(), vec![1.0, 0.0])?;
//! graph.insert("b".into(), vec![0.0, 1.0])?;
//! let hits = graph.search(&[0.9, 0.1], 1)?;
//! assert_eq!(hits[0].key, "a");
//! # Ok::<(), yakhnsw::HnswError>(())
//! ```

pub use yakhnsw_core::*;
