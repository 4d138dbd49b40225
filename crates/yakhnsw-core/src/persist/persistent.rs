//! Offset-indexed snapshot of a graph and its binary layout
//!
//! ```text
//! magic "YAKHNSW" | version:u32 | total:u32 | dims:u32 | M:u32 | Ml:f32 | efSearch:u32 | pqMode:u8
//! [pqMode] pqM:u32 pqK:u32 subVectorDim:u32 pqCodeSize:u32 centroid tensor
//! layers:    varint count × (varint node count, offset:u32 ...)
//! nodes:     varint count × (key bytes, pqCodeSize raw bytes | dims × f64)
//! neighbors: varint count × (offset:u32, varint count, offset:u32 ...)
//! ```
//!
//! Offset 0 is the sentinel: its node entry has an empty key and a zeroed
//! payload, and no layer or neighbor list refers to it. Every layer
//! occurrence of a graph node gets its own offset, so each layer's adjacency
//! is stored separately. On load, entries that share a key collapse back
//! into one node.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use super::codebook_codec::{codebook_from_tensor, read_centroids, write_centroids};
use super::wire::{capacity, WireReader, WireWriter};
use super::{MAGIC, VERSION};
use crate::distance::DistanceKind;
use crate::error::{HnswError, Result};
use crate::hnsw::{Graph, GraphConfig, Layer, NodeArena, NodeData, NodeId, VectorAccessor, VectorLoader};
use crate::key::GraphKey;
use crate::pq::{Codebook, Quantizer};

/// Payload kind carried by every node of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    Standard,
    Pq,
}

/// Codebook as embedded in a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentCodebook {
    pub m: u32,
    pub k: u32,
    pub sub_vector_dim: u32,
    pub code_size: u32,
    pub centroids: Arc<Codebook>,
}

impl PersistentCodebook {
    pub fn new(codebook: Arc<Codebook>) -> Self {
        Self {
            m: codebook.m() as u32,
            k: codebook.k() as u32,
            sub_vector_dim: codebook.sub_vector_dim() as u32,
            code_size: codebook.code_size() as u32,
            centroids: codebook,
        }
    }

    fn validate(&self, dims: u32) -> Result<()> {
        let cb = &self.centroids;
        if cb.m() != self.m as usize
            || cb.k() != self.k as usize
            || cb.sub_vector_dim() != self.sub_vector_dim as usize
        {
            return Err(HnswError::config(format!(
                "codebook header M={} K={} SubVectorDim={} does not match centroids M={} K={} SubVectorDim={}",
                self.m,
                self.k,
                self.sub_vector_dim,
                cb.m(),
                cb.k(),
                cb.sub_vector_dim()
            )));
        }
        if self.code_size != self.m {
            return Err(HnswError::config(format!(
                "PQ code size {} must equal M {}",
                self.code_size, self.m
            )));
        }
        if cb.dims() != dims as usize {
            return Err(HnswError::DimensionMismatch {
                expected: dims as usize,
                actual: cb.dims(),
            });
        }
        Ok(())
    }
}

/// Layer membership by offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentLayer {
    pub level: usize,
    pub nodes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeCode {
    Vector(Vec<f64>),
    Pq(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistentNode<K> {
    pub key: K,
    pub code: NodeCode,
}

/// Flattened, offset-addressed form of a graph
///
/// `nodes[i]` is the node at offset `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Persistent<K> {
    /// Nodes in layer 0
    pub total: u32,
    pub dims: u32,
    pub m: u32,
    pub ml: f32,
    pub ef_search: u32,
    pub export_mode: ExportMode,
    pub pq_codebook: Option<PersistentCodebook>,
    pub layers: Vec<PersistentLayer>,
    pub nodes: Vec<PersistentNode<K>>,
    pub neighbors: BTreeMap<u32, Vec<u32>>,
}

impl<K: GraphKey> Persistent<K> {
    /// Snapshot a graph
    ///
    /// Standard nodes are materialized, so lazy vectors are loaded here.
    pub fn from_graph(graph: &Graph<K>) -> Result<Self> {
        if graph.is_empty() {
            return Err(HnswError::State("cannot export: graph is nil or empty".into()));
        }

        let config = graph.config();
        let mut nodes = Vec::new();
        let mut layers = Vec::with_capacity(graph.layers.len());
        let mut neighbors = BTreeMap::new();

        for (level, layer) in graph.layers.iter().enumerate() {
            let mut offsets: HashMap<NodeId, u32> = HashMap::with_capacity(layer.len());
            let mut members = Vec::with_capacity(layer.len());
            for id in layer.ids() {
                let entry = &graph.arena[id];
                let code = match entry.data() {
                    NodeData::Pq(code) => NodeCode::Pq(code.to_vec()),
                    NodeData::Standard(_) => {
                        NodeCode::Vector(entry.vector()?.iter().map(|&x| x as f64).collect())
                    }
                };
                nodes.push(PersistentNode {
                    key: entry.key().clone(),
                    code,
                });
                let offset = u32::try_from(nodes.len())
                    .map_err(|_| HnswError::protocol("graph too large for 32-bit offsets"))?;
                offsets.insert(id, offset);
                members.push(offset);
            }
            for id in layer.ids() {
                let list = layer.neighbors(id).map(|n| offsets[&n]).collect();
                neighbors.insert(offsets[&id], list);
            }
            layers.push(PersistentLayer {
                level,
                nodes: members,
            });
        }

        let persistent = Self {
            total: graph.len() as u32,
            dims: graph.dims() as u32,
            m: config.m as u32,
            ml: config.ml as f32,
            ef_search: config.ef_search as u32,
            export_mode: if graph.is_pq_enabled() {
                ExportMode::Pq
            } else {
                ExportMode::Standard
            },
            pq_codebook: graph.codebook().cloned().map(PersistentCodebook::new),
            layers,
            nodes,
            neighbors,
        };
        persistent.validate()?;
        Ok(persistent)
    }

    fn node(&self, offset: u32) -> Result<&PersistentNode<K>> {
        offset
            .checked_sub(1)
            .and_then(|i| self.nodes.get(i as usize))
            .ok_or_else(|| HnswError::NotFound(format!("node offset {offset}")))
    }

    /// Structural checks shared by export and import
    pub fn validate(&self) -> Result<()> {
        if self.m == 0 {
            return Err(HnswError::config("M must be positive"));
        }
        if !(self.ml > 0.0 && self.ml <= 1.0) {
            return Err(HnswError::config(format!("Ml must be in (0, 1], got {}", self.ml)));
        }
        if self.ef_search == 0 {
            return Err(HnswError::config("EfSearch must be positive"));
        }
        if self.nodes.is_empty() || self.layers.first().map_or(true, |l| l.nodes.is_empty()) {
            return Err(HnswError::State("graph is nil or empty".into()));
        }
        if self.dims == 0 {
            return Err(HnswError::config("dims must be positive"));
        }
        if self.total as usize != self.layers[0].nodes.len() {
            return Err(HnswError::protocol(format!(
                "header counts {} nodes but layer 0 holds {}",
                self.total,
                self.layers[0].nodes.len()
            )));
        }

        let code_size = match (self.export_mode, &self.pq_codebook) {
            (ExportMode::Pq, Some(cb)) => {
                cb.validate(self.dims)?;
                Some((cb.code_size as usize, cb.k))
            }
            (ExportMode::Standard, None) => None,
            (ExportMode::Pq, None) => {
                return Err(HnswError::config("PQ export without a codebook"));
            }
            (ExportMode::Standard, Some(_)) => {
                return Err(HnswError::config("standard export carries a PQ codebook"));
            }
        };

        for (i, node) in self.nodes.iter().enumerate() {
            let offset = i + 1;
            match (&node.code, code_size) {
                (NodeCode::Vector(v), None) => {
                    if v.len() != self.dims as usize {
                        return Err(HnswError::DimensionMismatch {
                            expected: self.dims as usize,
                            actual: v.len(),
                        });
                    }
                }
                (NodeCode::Pq(code), Some((size, k))) => {
                    if code.len() != size {
                        return Err(HnswError::config(format!(
                            "node at offset {offset} has a {}-byte PQ code, expected {size}",
                            code.len()
                        )));
                    }
                    if let Some(&bad) = code.iter().find(|&&c| c as u32 >= k) {
                        return Err(HnswError::protocol(format!(
                            "node at offset {offset} has code {bad} outside K={k}"
                        )));
                    }
                }
                _ => {
                    return Err(HnswError::config(format!(
                        "node at offset {offset} does not match the {:?} export mode",
                        self.export_mode
                    )));
                }
            }
        }

        let mut members: Vec<Vec<&K>> = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.level != i {
                return Err(HnswError::protocol(format!(
                    "layer at position {i} declares level {}",
                    layer.level
                )));
            }
            if layer.nodes.is_empty() {
                return Err(HnswError::protocol(format!("layer {i} is empty")));
            }
            let mut keys = Vec::with_capacity(layer.nodes.len());
            for &offset in &layer.nodes {
                keys.push(&self.node(offset)?.key);
            }
            keys.sort();
            members.push(keys);
        }
        for level in 1..members.len() {
            if let Some(orphan) = members[level]
                .iter()
                .find(|k| members[level - 1].binary_search(*k).is_err())
            {
                return Err(HnswError::protocol(format!(
                    "key {orphan:?} is in layer {level} but missing from layer {}",
                    level - 1
                )));
            }
        }

        for (&from, list) in &self.neighbors {
            self.node(from)?;
            for &to in list {
                self.node(to)?;
            }
        }
        Ok(())
    }

    // ====== Binary ======

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        self.validate()?;
        let mut w = WireWriter::new(writer);
        w.bytes(MAGIC)?;
        w.u32(VERSION)?;
        w.u32(self.total)?;
        w.u32(self.dims)?;
        w.u32(self.m)?;
        w.f32(self.ml)?;
        w.u32(self.ef_search)?;
        w.bool(self.export_mode == ExportMode::Pq)?;
        if let Some(cb) = &self.pq_codebook {
            w.u32(cb.m)?;
            w.u32(cb.k)?;
            w.u32(cb.sub_vector_dim)?;
            w.u32(cb.code_size)?;
            write_centroids(&mut w, &cb.centroids)?;
        }

        w.count(self.layers.len())?;
        for layer in &self.layers {
            w.count(layer.nodes.len())?;
            for &offset in &layer.nodes {
                w.u32(offset)?;
            }
        }

        w.count(self.nodes.len() + 1)?;
        let code_size = self.pq_codebook.as_ref().map(|cb| cb.code_size as usize);
        match code_size {
            Some(size) => {
                w.prefixed(&[])?;
                w.bytes(&vec![0u8; size])?;
            }
            None => {
                w.prefixed(&[])?;
                for _ in 0..self.dims {
                    w.f64(0.0)?;
                }
            }
        }
        for node in &self.nodes {
            w.prefixed(&node.key.encode_key())?;
            match &node.code {
                NodeCode::Pq(code) => w.bytes(code)?,
                NodeCode::Vector(v) => {
                    for &x in v {
                        w.f64(x)?;
                    }
                }
            }
        }

        w.count(self.neighbors.len())?;
        for (&offset, list) in &self.neighbors {
            w.u32(offset)?;
            w.count(list.len())?;
            for &n in list {
                w.u32(n)?;
            }
        }
        w.flush()
    }

    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut r = WireReader::new(reader);
        let persistent = Self::decode(&mut r)?;
        persistent.validate()?;
        Ok(persistent)
    }

    /// Decode a buffer holding exactly one snapshot
    pub fn load_binary(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(HnswError::protocol("empty input"));
        }
        let mut r = WireReader::new(bytes);
        let persistent = Self::decode(&mut r)?;
        r.finish()?;
        persistent.validate()?;
        Ok(persistent)
    }

    fn decode<R: Read>(r: &mut WireReader<R>) -> Result<Self> {
        let magic: [u8; 7] = r.exact("magic")?;
        if &magic != MAGIC {
            return Err(HnswError::protocol(format!("bad magic {magic:?}")));
        }
        let version = r.u32("version")?;
        if version != VERSION {
            return Err(HnswError::protocol(format!(
                "unsupported version {version}, expected {VERSION}"
            )));
        }
        let total = r.u32("total")?;
        let dims = r.u32("dims")?;
        let m = r.u32("M")?;
        let ml = r.f32("Ml")?;
        let ef_search = r.u32("EfSearch")?;
        let pq_mode = r.bool("PQ mode")?;

        let pq_codebook = if pq_mode {
            let pq_m = r.u32("PQ M")?;
            let pq_k = r.u32("PQ K")?;
            let sub_vector_dim = r.u32("PQ SubVectorDim")?;
            let code_size = r.u32("PQ code size")?;
            let tensor = read_centroids(r)?;
            let codebook =
                codebook_from_tensor(pq_m as usize, pq_k as usize, sub_vector_dim as usize, tensor)?;
            Some(PersistentCodebook {
                m: pq_m,
                k: pq_k,
                sub_vector_dim,
                code_size,
                centroids: Arc::new(codebook),
            })
        } else {
            None
        };

        let layer_count = r.count("layer count")?;
        let mut layers = Vec::with_capacity(capacity(layer_count));
        for level in 0..layer_count {
            let n = r.count("layer size")?;
            let mut nodes = Vec::with_capacity(capacity(n));
            for _ in 0..n {
                nodes.push(r.u32("layer offset")?);
            }
            layers.push(PersistentLayer { level, nodes });
        }

        let node_count = r.count("node count")?;
        if node_count == 0 {
            return Err(HnswError::protocol("node table is missing the sentinel entry"));
        }
        let code_size = pq_codebook.as_ref().map(|cb| cb.code_size as usize);
        let mut nodes = Vec::with_capacity(capacity(node_count - 1));
        for i in 0..node_count {
            let raw_key = r.prefixed("node key")?;
            let code = match code_size {
                Some(size) => NodeCode::Pq(r.bytes(size, "PQ code")?),
                None => {
                    let mut v = Vec::with_capacity(capacity(dims as usize));
                    for _ in 0..dims {
                        v.push(r.f64("vector value")?);
                    }
                    NodeCode::Vector(v)
                }
            };
            if i == 0 {
                continue;
            }
            nodes.push(PersistentNode {
                key: K::decode_key(&raw_key)?,
                code,
            });
        }

        let neighbor_count = r.count("neighbor table size")?;
        let mut neighbors = BTreeMap::new();
        for _ in 0..neighbor_count {
            let offset = r.u32("neighbor owner")?;
            let n = r.count("neighbor count")?;
            let mut list = Vec::with_capacity(capacity(n));
            for _ in 0..n {
                list.push(r.u32("neighbor offset")?);
            }
            neighbors.insert(offset, list);
        }

        Ok(Self {
            total,
            dims,
            m,
            ml,
            ef_search,
            export_mode: if pq_mode { ExportMode::Pq } else { ExportMode::Standard },
            pq_codebook,
            layers,
            nodes,
            neighbors,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))?;
        tracing::info!(
            path = %path.as_ref().display(),
            nodes = self.total,
            layers = self.layers.len(),
            "saved graph"
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let persistent = Self::read_from(BufReader::new(file))?;
        tracing::info!(
            path = %path.as_ref().display(),
            nodes = persistent.total,
            layers = persistent.layers.len(),
            "loaded graph"
        );
        Ok(persistent)
    }

    // ====== Rebuild ======

    /// Rebuild with cosine distance
    pub fn build_graph(&self) -> Result<Graph<K>> {
        self.assemble(DistanceKind::Cosine, None)
    }

    pub fn build_graph_with_distance(&self, distance: DistanceKind) -> Result<Graph<K>> {
        self.assemble(distance, None)
    }

    /// Rebuild with standard nodes that fetch their vectors through `loader`
    ///
    /// Stored vectors are ignored; PQ nodes keep their codes.
    pub fn build_graph_lazy(
        &self,
        distance: DistanceKind,
        loader: Arc<dyn VectorLoader<K>>,
    ) -> Result<Graph<K>> {
        self.assemble(distance, Some(loader))
    }

    fn assemble(&self, distance: DistanceKind, loader: Option<Arc<dyn VectorLoader<K>>>) -> Result<Graph<K>> {
        self.validate()?;
        let config = GraphConfig {
            m: self.m as usize,
            ml: self.ml as f64,
            ef_search: self.ef_search as usize,
            distance,
            seed: None,
        };
        let quantizer = self
            .pq_codebook
            .as_ref()
            .map(|cb| Quantizer::new(cb.centroids.clone()));

        let mut arena: NodeArena<K> = NodeArena::default();
        let mut by_offset: HashMap<u32, NodeId> = HashMap::with_capacity(self.nodes.len());
        let mut layers: Vec<Layer> = Vec::with_capacity(self.layers.len());

        for persistent_layer in &self.layers {
            let mut layer = Layer::default();
            for &offset in &persistent_layer.nodes {
                let node = self.node(offset)?;
                let id = match arena.lookup(&node.key) {
                    Some(id) => id,
                    None => {
                        let data = match (&node.code, &loader) {
                            (NodeCode::Pq(code), _) => NodeData::Pq(code.clone().into_boxed_slice()),
                            (NodeCode::Vector(_), Some(loader)) => {
                                NodeData::Standard(VectorAccessor::Lazy(loader.clone()))
                            }
                            (NodeCode::Vector(v), None) => NodeData::Standard(VectorAccessor::Owned(
                                v.iter().map(|&x| x as f32).collect(),
                            )),
                        };
                        arena.insert(node.key.clone(), data)
                    }
                };
                by_offset.insert(offset, id);
                layer.insert(id);
            }
            layers.push(layer);
        }

        let m = self.m as usize;
        let mut truncated = 0usize;
        for (persistent_layer, layer) in self.layers.iter().zip(layers.iter_mut()) {
            for &offset in &persistent_layer.nodes {
                let from = by_offset[&offset];
                let Some(list) = self.neighbors.get(&offset) else {
                    continue;
                };
                for &n in list {
                    let Some(&to) = by_offset.get(&n) else {
                        continue;
                    };
                    if !layer.contains(to) {
                        continue;
                    }
                    if layer.degree(from) >= m {
                        truncated += 1;
                        continue;
                    }
                    layer.link(from, to);
                }
            }
        }
        if truncated > 0 {
            tracing::warn!(truncated, m, "dropped stored edges beyond the degree cap");
        }

        let dims = self.dims as usize;
        Graph::from_parts(config, layers, arena, quantizer, dims)
    }
}
