//! Binary persistence
//!
//! Two graph formats:
//! - [`Persistent`]: the offset-indexed `YAKHNSW` snapshot, supports PQ graphs
//! - [`Graph::export`](crate::hnsw::Graph::export) / [`Graph::import`](crate::hnsw::Graph::import):
//!   a key-addressed stream for standard graphs
//!
//! plus a standalone codebook format ([`Codebook::to_bytes`](crate::pq::Codebook::to_bytes)).

mod codebook_codec;
mod persistent;
mod stream;
mod wire;

use std::path::Path;

pub use persistent::{ExportMode, NodeCode, Persistent, PersistentCodebook, PersistentLayer, PersistentNode};
pub use stream::STREAM_VERSION;

use crate::distance::DistanceKind;
use crate::error::Result;
use crate::hnsw::Graph;
use crate::key::GraphKey;

/// Leading bytes of every snapshot
pub const MAGIC: &[u8; 7] = b"YAKHNSW";

/// Snapshot format version
pub const VERSION: u32 = 1;

impl<K: GraphKey> Graph<K> {
    pub fn to_persistent(&self) -> Result<Persistent<K>> {
        Persistent::from_graph(self)
    }

    pub fn to_binary(&self) -> Result<Vec<u8>> {
        self.to_persistent()?.to_binary()
    }

    /// Decode a snapshot and rebuild the graph with the given metric
    pub fn from_binary(bytes: &[u8], distance: DistanceKind) -> Result<Self> {
        Persistent::load_binary(bytes)?.build_graph_with_distance(distance)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_persistent()?.save(path)
    }

    pub fn load<P: AsRef<Path>>(path: P, distance: DistanceKind) -> Result<Self> {
        Persistent::load(path)?.build_graph_with_distance(distance)
    }
}
