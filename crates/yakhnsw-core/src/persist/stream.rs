//! Key-addressed streaming format for standard graphs
//!
//! ```text
//! varint version | varint M | Ml:f64 | varint efSearch | distance name
//! varint layer count × (varint node count × (key, varint dims, f32 ..., varint n, key ...))
//! ```
//!
//! Neighbors are referenced by key, so the stream can be written in one pass
//! without an offset table.

use std::collections::HashMap;
use std::io::{Read, Write};

use super::wire::{capacity, WireReader, WireWriter};
use crate::distance::DistanceKind;
use crate::error::{HnswError, Result};
use crate::hnsw::{Graph, GraphConfig, Layer, NodeArena, NodeData, NodeId, VectorAccessor};
use crate::key::GraphKey;

pub const STREAM_VERSION: u64 = 1;

impl<K: GraphKey> Graph<K> {
    /// Write the graph to `writer`
    ///
    /// PQ graphs hold no raw vectors and cannot be streamed; use
    /// [`Persistent`](crate::persist::Persistent) instead.
    pub fn export<W: Write>(&self, writer: W) -> Result<()> {
        if self.is_pq_enabled() {
            return Err(HnswError::State(
                "PQ graphs cannot be streamed; export a Persistent snapshot instead".into(),
            ));
        }
        let config = self.config();
        let mut w = WireWriter::new(writer);
        w.varint(STREAM_VERSION)?;
        w.count(config.m)?;
        w.f64(config.ml)?;
        w.count(config.ef_search)?;
        w.string(config.distance.name())?;

        w.count(self.layers.len())?;
        for layer in &self.layers {
            w.count(layer.len())?;
            for id in layer.ids() {
                let entry = &self.arena[id];
                w.prefixed(&entry.key().encode_key())?;
                let vector = entry.vector()?;
                w.count(vector.len())?;
                for &x in vector.iter() {
                    w.f32(x)?;
                }
                w.count(layer.degree(id))?;
                for neighbor in layer.neighbors(id) {
                    w.prefixed(&self.arena[neighbor].key().encode_key())?;
                }
            }
        }
        w.flush()
    }

    /// Read a graph written by [`export`](Self::export)
    ///
    /// Level sampling for later inserts is reseeded at random.
    pub fn import<R: Read>(reader: R) -> Result<Self> {
        let mut r = WireReader::new(reader);
        let version = r.varint("stream version")?;
        if version != STREAM_VERSION {
            return Err(HnswError::protocol(format!(
                "incompatible stream version {version}, expected {STREAM_VERSION}"
            )));
        }
        let m = r.count("M")?;
        let ml = r.f64("Ml")?;
        let ef_search = r.count("EfSearch")?;
        let name = r.string("distance name")?;
        let distance: DistanceKind = name
            .parse()
            .map_err(|e: crate::distance::UnknownDistance| HnswError::protocol(e.to_string()))?;
        let config = GraphConfig {
            m,
            ml,
            ef_search,
            distance,
            seed: None,
        };
        config.validate()?;

        let mut arena: NodeArena<K> = NodeArena::default();
        let mut layers: Vec<Layer> = Vec::new();
        let mut dims = 0usize;
        let mut truncated = 0usize;

        let layer_count = r.count("layer count")?;
        for level in 0..layer_count {
            let node_count = r.count("layer size")?;
            if node_count == 0 {
                return Err(HnswError::protocol(format!("layer {level} is empty")));
            }
            let mut layer = Layer::default();
            let mut pending: Vec<(NodeId, Vec<K>)> = Vec::with_capacity(capacity(node_count));
            let mut members: HashMap<K, NodeId> = HashMap::with_capacity(capacity(node_count));

            for _ in 0..node_count {
                let key = K::decode_key(&r.prefixed("node key")?)?;
                let len = r.count("vector length")?;
                let mut vector = Vec::with_capacity(capacity(len));
                for _ in 0..len {
                    vector.push(r.f32("vector value")?);
                }
                if dims == 0 {
                    dims = len;
                }
                if len == 0 || len != dims {
                    return Err(HnswError::DimensionMismatch {
                        expected: dims,
                        actual: len,
                    });
                }

                let n = r.count("neighbor count")?;
                let mut neighbor_keys = Vec::with_capacity(capacity(n));
                for _ in 0..n {
                    neighbor_keys.push(K::decode_key(&r.prefixed("neighbor key")?)?);
                }

                let id = match arena.lookup(&key) {
                    Some(id) => id,
                    None => arena.insert(
                        key.clone(),
                        NodeData::Standard(VectorAccessor::Owned(vector.into())),
                    ),
                };
                if level > 0 && !layers[level - 1].contains(id) {
                    return Err(HnswError::protocol(format!(
                        "key {key:?} is in layer {level} but missing from layer {}",
                        level - 1
                    )));
                }
                layer.insert(id);
                members.insert(key, id);
                pending.push((id, neighbor_keys));
            }

            for (id, neighbor_keys) in pending {
                for key in neighbor_keys {
                    let Some(&to) = members.get(&key) else {
                        continue;
                    };
                    if layer.degree(id) >= m {
                        truncated += 1;
                        continue;
                    }
                    layer.link(id, to);
                }
            }
            layers.push(layer);
        }
        r.finish()?;

        if truncated > 0 {
            tracing::warn!(truncated, m, "dropped streamed edges beyond the degree cap");
        }
        tracing::debug!(layers = layers.len(), nodes = arena.len(), "imported graph stream");
        Graph::from_parts(config, layers, arena, None, dims)
    }
}
