//! HNSW Graph
//!
//! The multi-layer graph with:
//! - Random insertion level capped at `round(ln N / ln(1/Ml)) + 1`
//! - Degree cap M with furthest-neighbor eviction and replenish-on-evict
//! - Greedy 1-NN descent through upper layers, beam search on layer 0
//! - Delete with best-effort repair from neighbors of neighbors
//!
//! # Algorithm Overview
//!
//! **Insert**: draw level L, extend the layer list up to L, then walk every
//! layer from the top down. Layers above L only move the elevator (search
//! width 1); layers 0..=L host the node and link it both ways to the M
//! closest members found.
//!
//! **Search**: 1-NN descent to layer 0, then beam search for k results with
//! `ef = EfSearch`.
//!
//! The graph is not internally synchronized; share it through
//! [`GraphWrapper`](crate::wrapper::GraphWrapper).

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::layer::Layer;
use super::metric::Metric;
use super::node::{InputNode, NodeArena, NodeData, NodeId, VectorAccessor, VectorLoader};
use super::search::search_layer;
use super::stats::{GraphStats, PerformanceCounters, PerformanceStats};
use crate::distance::DistanceKind;
use crate::error::{HnswError, Result};
use crate::key::Key;
use crate::pq::{self, Codebook, Quantizer, TrainingConfig};

/// Hard ceiling on the insertion level
const MAX_LEVEL: usize = 32;

/// Graph parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Max neighbors per node on every layer (default: 16)
    pub m: usize,

    /// Probability of promoting a node one more layer, in (0, 1] (default: 0.25)
    pub ml: f64,

    /// Candidate-set width of the beam search (default: 20)
    pub ef_search: usize,

    /// Distance metric (default: cosine)
    pub distance: DistanceKind,

    /// Seed for level sampling (None = random)
    pub seed: Option<u64>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ml: 0.25,
            ef_search: 20,
            distance: DistanceKind::Cosine,
            seed: None,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.m == 0 {
            return Err(HnswError::config("M must be positive"));
        }
        if !(self.ml > 0.0 && self.ml <= 1.0) {
            return Err(HnswError::config(format!(
                "Ml must be in (0, 1], got {}",
                self.ml
            )));
        }
        if self.ef_search == 0 {
            return Err(HnswError::config("EfSearch must be positive"));
        }
        Ok(())
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<K> {
    pub key: K,
    /// Raw vector; `None` for PQ-encoded nodes
    pub vector: Option<Vec<f32>>,
    pub distance: f64,
    pub is_pq: bool,
}

/// HNSW graph keyed by `K`
pub struct Graph<K> {
    config: GraphConfig,
    rng: StdRng,
    pub(crate) layers: Vec<Layer>,
    pub(crate) arena: NodeArena<K>,
    quantizer: Option<Quantizer>,
    dims: usize,
    counters: PerformanceCounters,
}

impl<K: Key> fmt::Debug for Graph<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("layers", &self.layers.len())
            .field("dims", &self.dims())
            .field("pq", &self.is_pq_enabled())
            .finish()
    }
}

impl<K: Key> Graph<K> {
    /// Create an empty graph
    pub fn new(config: GraphConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            layers: Vec::new(),
            arena: NodeArena::default(),
            quantizer: None,
            dims: 0,
            counters: PerformanceCounters::default(),
        })
    }

    /// Create an empty graph that stores PQ codes from the start
    pub fn with_codebook(config: GraphConfig, codebook: Arc<Codebook>) -> Result<Self> {
        let mut graph = Self::new(config)?;
        graph.set_pq_codebook(codebook)?;
        Ok(graph)
    }

    /// Assemble a graph from already-linked parts (used by the loaders)
    pub(crate) fn from_parts(
        config: GraphConfig,
        layers: Vec<Layer>,
        arena: NodeArena<K>,
        quantizer: Option<Quantizer>,
        dims: usize,
    ) -> Result<Self> {
        let mut graph = Self::new(config)?;
        graph.layers = layers;
        graph.arena = arena;
        graph.quantizer = quantizer;
        graph.dims = dims;
        Ok(graph)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn distance_kind(&self) -> DistanceKind {
        self.config.distance
    }

    pub(crate) fn metric(&self) -> Metric<'_, K> {
        Metric::new(
            &self.arena,
            self.config.distance,
            self.quantizer.as_ref(),
            &self.counters,
        )
    }

    // ====== Queries ======

    /// Nodes in layer 0
    pub fn len(&self) -> usize {
        self.layers.first().map_or(0, Layer::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, key: &K) -> bool {
        self.arena
            .lookup(key)
            .is_some_and(|id| self.layers.first().is_some_and(|l| l.contains(id)))
    }

    /// Raw vector stored under `key`; `None` if absent or PQ-encoded
    pub fn lookup(&self, key: &K) -> Result<Option<Vec<f32>>> {
        let Some(id) = self.arena.lookup(key) else {
            return Ok(None);
        };
        let entry = &self.arena[id];
        if entry.is_pq() {
            return Ok(None);
        }
        Ok(Some(entry.vector()?.into_owned()))
    }

    /// Vector dimension; 0 until the first insert
    pub fn dims(&self) -> usize {
        match &self.quantizer {
            Some(q) => q.dims(),
            None => self.dims,
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Keys of every node in `level`, in key order
    pub fn layer_keys(&self, level: usize) -> Vec<K> {
        let mut keys: Vec<K> = self
            .layers
            .get(level)
            .map(|l| l.ids().map(|id| self.arena[id].key().clone()).collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Neighbor keys of `key` in `level`, in key order
    pub fn neighbor_keys(&self, level: usize, key: &K) -> Vec<K> {
        let (Some(layer), Some(id)) = (self.layers.get(level), self.arena.lookup(key)) else {
            return Vec::new();
        };
        let mut keys: Vec<K> = layer
            .neighbors(id)
            .map(|n| self.arena[n].key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> GraphStats {
        let layer_sizes: Vec<usize> = self.layers.iter().map(Layer::len).collect();
        let total_edges = self
            .layers
            .iter()
            .map(|l| l.ids().map(|id| l.degree(id)).sum::<usize>())
            .sum();
        let (base_edges, max_degree) = self.layers.first().map_or((0, 0), |l| {
            l.ids().fold((0, 0), |(sum, max), id| {
                let d = l.degree(id);
                (sum + d, max.max(d))
            })
        });
        let num_nodes = self.len();
        GraphStats {
            num_nodes,
            layer_sizes,
            total_edges,
            avg_degree: if num_nodes == 0 {
                0.0
            } else {
                base_edges as f64 / num_nodes as f64
            },
            max_degree,
            dims: self.dims(),
            pq_enabled: self.is_pq_enabled(),
        }
    }

    pub fn performance(&self) -> PerformanceStats {
        self.counters.snapshot()
    }

    pub fn reset_performance(&self) {
        self.counters.reset();
    }

    // ====== Insertion ======

    fn random_level(&mut self) -> usize {
        let n = self.len();
        let max = if n == 0 {
            1
        } else {
            let levels = (n as f64).ln() / (1.0 / self.config.ml).ln();
            (levels.round() as usize).saturating_add(1).min(MAX_LEVEL)
        };
        for level in 0..max {
            if self.rng.gen::<f64>() > self.config.ml {
                return level;
            }
        }
        max
    }

    /// Insert `key` with an in-memory vector
    pub fn insert(&mut self, key: K, vector: Vec<f32>) -> Result<()> {
        self.add([InputNode::new(key, vector)])
    }

    /// Insert nodes; an existing key is replaced
    pub fn add<I>(&mut self, nodes: I) -> Result<()>
    where
        I: IntoIterator<Item = InputNode<K>>,
    {
        for node in nodes {
            self.add_one(node)?;
        }
        Ok(())
    }

    fn add_one(&mut self, node: InputNode<K>) -> Result<()> {
        let InputNode { key, vector: accessor } = node;
        let vector = accessor.load(&key)?.into_owned();

        let expected = self.dims();
        let replacing = self.has(&key);
        let sole_node = replacing && self.len() == 1 && !self.is_pq_enabled();
        if vector.is_empty() || (expected != 0 && vector.len() != expected && !sole_node) {
            return Err(HnswError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let data = match &self.quantizer {
            Some(q) => NodeData::Pq(q.encode_f32(&vector)?.into_boxed_slice()),
            None => NodeData::Standard(accessor),
        };

        if let Some(id) = self.arena.lookup(&key) {
            return self.replace(id, data, &vector);
        }

        let level = self.random_level();
        self.grow_to(level);

        let id = self.arena.insert(key, data);
        if self.dims == 0 {
            self.dims = vector.len();
        }

        if let Err(e) = self.link_new_node(id, level, &vector) {
            self.unlink_failed(id);
            return Err(e);
        }
        Ok(())
    }

    /// Relink an existing node under a new payload
    ///
    /// All-or-nothing: if linking fails the layers and the old payload are
    /// restored, so the key is never lost.
    fn replace(&mut self, id: NodeId, data: NodeData<K>, vector: &[f32]) -> Result<()> {
        let saved_layers = self.layers.clone();
        let saved_dims = self.dims;
        let sole_node = self.len() == 1;

        let old = self.arena.set_data(id, data);
        self.isolate_everywhere(id);
        if sole_node {
            self.dims = vector.len();
        }

        let level = self.random_level();
        self.grow_to(level);
        match self.link_new_node(id, level, vector) {
            Ok(()) => {
                self.drop_empty_layers();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "replace failed, restoring previous node");
                self.layers = saved_layers;
                self.dims = saved_dims;
                if let Some(old) = old {
                    self.arena.set_data(id, old);
                }
                Err(e)
            }
        }
    }

    fn grow_to(&mut self, level: usize) {
        while self.layers.len() <= level {
            self.layers.push(Layer::default());
            tracing::debug!(layers = self.layers.len(), "graph grew a layer");
        }
    }

    fn drop_empty_layers(&mut self) {
        let before = self.layers.len();
        self.layers.retain(|l| !l.is_empty());
        if self.layers.len() != before {
            tracing::debug!(dropped = before - self.layers.len(), "dropped empty layers");
        }
    }

    fn link_new_node(&mut self, id: NodeId, level: usize, vector: &[f32]) -> Result<()> {
        let m = self.config.m;
        let ef_search = self.config.ef_search;
        let metric = Metric::new(
            &self.arena,
            self.config.distance,
            self.quantizer.as_ref(),
            &self.counters,
        );
        let query = metric.prepare(vector)?;

        let mut elevator: Option<NodeId> = None;
        for i in (0..self.layers.len()).rev() {
            let layer = &mut self.layers[i];
            if layer.is_empty() {
                if i <= level {
                    layer.insert(id);
                }
                continue;
            }

            let start = elevator
                .filter(|&e| layer.contains(e))
                .or_else(|| layer.entry());
            let (k, ef) = if i > level {
                (1, ef_search)
            } else if i == 0 {
                (m, ef_search.max(2 * m))
            } else {
                (m, ef_search)
            };

            let found = search_layer(
                layer,
                metric.arena(),
                start,
                k,
                ef,
                |n| metric.to_query(&query, n),
                None,
            )?;
            let Some(best) = found.first() else {
                return Err(HnswError::State(format!(
                    "no entry candidates found in layer {i}"
                )));
            };
            elevator = Some(best.id);

            if i <= level {
                layer.insert(id);
                for candidate in &found {
                    layer.add_neighbor(candidate.id, id, m, &metric)?;
                    layer.add_neighbor(id, candidate.id, m, &metric)?;
                }
            }
        }
        Ok(())
    }

    /// Undo a partially linked insert
    fn unlink_failed(&mut self, id: NodeId) {
        for layer in &mut self.layers {
            layer.detach(id);
        }
        self.drop_empty_layers();
        self.arena.remove(id);
        if self.is_empty() {
            self.dims = 0;
        }
    }

    // ====== Deletion ======

    /// Remove `key` from every layer and repair its former neighbors
    ///
    /// Repair is best-effort: a neighbor whose vector cannot be loaded is
    /// left under-connected and logged, but the key is still removed.
    ///
    /// # Returns
    /// Whether the key was present
    pub fn delete(&mut self, key: &K) -> Result<bool> {
        let Some(id) = self.arena.lookup(key) else {
            return Ok(false);
        };

        let failures = self.isolate_everywhere(id);
        self.arena.remove(id);
        self.drop_empty_layers();
        if self.is_empty() {
            self.dims = 0;
        }
        if failures > 0 {
            tracing::debug!(failures, "deleted with incomplete neighbor repair");
        }
        Ok(true)
    }

    /// Detach `id` from every layer holding it and repair what it leaves behind
    ///
    /// # Returns
    /// How many neighbor repairs failed
    fn isolate_everywhere(&mut self, id: NodeId) -> usize {
        let m = self.config.m;
        let metric = Metric::new(
            &self.arena,
            self.config.distance,
            self.quantizer.as_ref(),
            &self.counters,
        );
        let mut failures = 0;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            if !layer.contains(id) {
                continue;
            }
            for e in layer.isolate(id, m, &metric) {
                tracing::warn!(error = %e, layer = i, "neighbor repair failed");
                failures += 1;
            }
        }
        failures
    }

    // ====== Search ======

    /// The `k` nearest nodes to `query`, closest first
    ///
    /// Layer 0 keeps `max(ef_search, k)` candidates, so a `k` above
    /// `ef_search` still yields `k` hits when the graph holds that many.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult<K>>> {
        self.search_with_distance_and_filter(query, k, None)
    }

    /// Like [`search`](Self::search), returning only keys accepted by `filter`
    pub fn search_with_filter<F>(&self, query: &[f32], k: usize, filter: F) -> Result<Vec<SearchResult<K>>>
    where
        F: Fn(&K) -> bool,
    {
        self.search_with_distance_and_filter(query, k, Some(&filter))
    }

    /// Full search entry point; rejected nodes are traversed but not returned
    pub fn search_with_distance_and_filter(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&dyn Fn(&K) -> bool>,
    ) -> Result<Vec<SearchResult<K>>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims() {
            return Err(HnswError::DimensionMismatch {
                expected: self.dims(),
                actual: query.len(),
            });
        }

        let metric = self.metric();
        let prepared = metric.prepare(query)?;

        let top = self.layers.len() - 1;
        let mut elevator = self.layers[top].entry();
        for level in (1..=top).rev() {
            let layer = &self.layers[level];
            let start = elevator.filter(|&e| layer.contains(e)).or_else(|| layer.entry());
            let found = search_layer(
                layer,
                &self.arena,
                start,
                1,
                self.config.ef_search,
                |n| metric.to_query(&prepared, n),
                None,
            )?;
            if let Some(best) = found.first() {
                elevator = Some(best.id);
            }
        }

        let accept = filter.map(|f| move |id: NodeId| f(self.arena[id].key()));
        let base = &self.layers[0];
        let start = elevator.filter(|&e| base.contains(e)).or_else(|| base.entry());
        let found = search_layer(
            base,
            &self.arena,
            start,
            k,
            self.config.ef_search.max(k),
            |n| metric.to_query(&prepared, n),
            accept.as_ref().map(|f| f as &dyn Fn(NodeId) -> bool),
        )?;

        found
            .into_iter()
            .map(|c| {
                let entry = &self.arena[c.id];
                let vector = match entry.data() {
                    NodeData::Standard(_) => Some(entry.vector()?.into_owned()),
                    NodeData::Pq(_) => None,
                };
                Ok(SearchResult {
                    key: entry.key().clone(),
                    vector,
                    distance: c.distance,
                    is_pq: entry.is_pq(),
                })
            })
            .collect()
    }

    // ====== Product quantization ======

    pub fn is_pq_enabled(&self) -> bool {
        self.quantizer.is_some()
    }

    pub fn quantizer(&self) -> Option<&Quantizer> {
        self.quantizer.as_ref()
    }

    pub fn codebook(&self) -> Option<&Arc<Codebook>> {
        self.quantizer.as_ref().map(Quantizer::codebook)
    }

    /// PQ code stored under `key`
    pub fn pq_code(&self, key: &K) -> Option<&[u8]> {
        self.arena.lookup(key).and_then(|id| self.arena[id].pq_code())
    }

    /// Switch to PQ mode, encoding every stored vector with `codebook`
    pub fn set_pq_codebook(&mut self, codebook: Arc<Codebook>) -> Result<()> {
        self.apply_codebook(codebook, &mut |_: &K, _: &[u8]| {})
    }

    fn apply_codebook(
        &mut self,
        codebook: Arc<Codebook>,
        on_encoded: &mut dyn FnMut(&K, &[u8]),
    ) -> Result<()> {
        if self.is_pq_enabled() {
            return Err(HnswError::State(
                "graph is already in PQ mode; convert to standard mode first".into(),
            ));
        }
        if self.dims != 0 && codebook.dims() != self.dims {
            return Err(HnswError::DimensionMismatch {
                expected: self.dims,
                actual: codebook.dims(),
            });
        }

        let quantizer = Quantizer::new(codebook);
        let mut codes: Vec<(NodeId, Box<[u8]>)> = Vec::with_capacity(self.arena.len());
        for (id, entry) in self.arena.iter() {
            let code = quantizer.encode_f32(&entry.vector()?)?;
            on_encoded(entry.key(), &code);
            codes.push((id, code.into_boxed_slice()));
        }
        for (id, code) in codes {
            self.arena.set_data(id, NodeData::Pq(code));
        }

        tracing::info!(
            nodes = self.arena.len(),
            m = quantizer.codebook().m(),
            k = quantizer.codebook().k(),
            "graph switched to PQ mode"
        );
        self.dims = quantizer.dims();
        self.quantizer = Some(quantizer);
        Ok(())
    }

    /// Train a codebook on the stored vectors and convert every node to PQ
    pub fn train_pq_codebook(&mut self, config: &TrainingConfig) -> Result<Arc<Codebook>> {
        self.train_pq_codebook_with_callback(config, |_, _| {})
    }

    /// Like [`train_pq_codebook`](Self::train_pq_codebook), reporting each `(key, code)` as it is encoded
    pub fn train_pq_codebook_with_callback<F>(
        &mut self,
        config: &TrainingConfig,
        mut on_encoded: F,
    ) -> Result<Arc<Codebook>>
    where
        F: FnMut(&K, &[u8]),
    {
        if self.is_empty() {
            return Err(HnswError::State(
                "cannot train a PQ codebook on an empty graph".into(),
            ));
        }
        if self.is_pq_enabled() {
            return Err(HnswError::State("graph is already in PQ mode".into()));
        }

        let mut vectors = Vec::with_capacity(self.arena.len());
        for (_, entry) in self.arena.iter() {
            vectors.push(entry.vector()?.iter().map(|&x| x as f64).collect::<Vec<f64>>());
        }
        let codebook = Arc::new(pq::train(vectors, config)?);
        self.apply_codebook(codebook.clone(), &mut on_encoded)?;
        Ok(codebook)
    }

    /// Train with `m` subspaces and `k` centroids, seeded from the graph's RNG
    pub fn train_pq_codebook_from_data(&mut self, m: usize, k: usize) -> Result<Arc<Codebook>> {
        let config = TrainingConfig {
            m,
            k,
            seed: Some(self.rng.gen()),
            ..TrainingConfig::default()
        };
        self.train_pq_codebook(&config)
    }

    pub fn train_pq_codebook_from_data_with_callback<F>(
        &mut self,
        m: usize,
        k: usize,
        on_encoded: F,
    ) -> Result<Arc<Codebook>>
    where
        F: FnMut(&K, &[u8]),
    {
        let config = TrainingConfig {
            m,
            k,
            seed: Some(self.rng.gen()),
            ..TrainingConfig::default()
        };
        self.train_pq_codebook_with_callback(&config, on_encoded)
    }

    /// Leave PQ mode; every node fetches its raw vector through `loader`
    ///
    /// The topology is kept as is. The codebook is dropped.
    pub fn convert_to_standard_mode(&mut self, loader: Arc<dyn VectorLoader<K>>) -> Result<()> {
        let Some(quantizer) = self.quantizer.as_ref() else {
            return Err(HnswError::State("graph is not in PQ mode".into()));
        };
        let dims = quantizer.dims();

        if let Some((_, entry)) = self.arena.iter().next() {
            VectorAccessor::Lazy(loader.clone()).load_exact(entry.key(), dims)?;
        }

        let ids: Vec<NodeId> = self.arena.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.arena
                .set_data(id, NodeData::Standard(VectorAccessor::Lazy(loader.clone())));
        }
        self.quantizer = None;
        self.dims = if self.is_empty() { 0 } else { dims };
        tracing::info!(nodes = self.arena.len(), "graph switched to standard mode");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
        (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
    }

    fn seeded(config: GraphConfig) -> Graph<String> {
        Graph::new(GraphConfig {
            seed: Some(42),
            ..config
        })
        .unwrap()
    }

    fn build(n: usize, dim: usize, seed: u64) -> (Graph<String>, Vec<(String, Vec<f32>)>) {
        let mut graph = seeded(GraphConfig::default());
        let mut rng = StdRng::seed_from_u64(seed);
        let data: Vec<(String, Vec<f32>)> = (0..n)
            .map(|i| (format!("node{i}"), random_vector(dim, &mut rng)))
            .collect();
        graph
            .add(data.iter().map(|(k, v)| InputNode::new(k.clone(), v.clone())))
            .unwrap();
        (graph, data)
    }

    fn assert_invariants(graph: &Graph<String>) {
        let m = graph.config().m;
        for level in 1..graph.layer_count() {
            let lower = graph.layer_keys(level - 1);
            for key in graph.layer_keys(level) {
                assert!(lower.binary_search(&key).is_ok(), "{key} breaks the pyramid at {level}");
            }
        }
        for level in 0..graph.layer_count() {
            for key in graph.layer_keys(level) {
                assert!(graph.neighbor_keys(level, &key).len() <= m);
            }
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(Graph::<u32>::new(GraphConfig::default()).is_ok());
        for bad in [
            GraphConfig { m: 0, ..Default::default() },
            GraphConfig { ml: 0.0, ..Default::default() },
            GraphConfig { ml: 1.5, ..Default::default() },
            GraphConfig { ml: f64::NAN, ..Default::default() },
            GraphConfig { ef_search: 0, ..Default::default() },
        ] {
            assert!(matches!(
                Graph::<u32>::new(bad),
                Err(HnswError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: GraphConfig =
            serde_json::from_str(r#"{"m": 8, "distance": "euclidean"}"#).unwrap();
        assert_eq!(config.m, 8);
        assert_eq!(config.distance, DistanceKind::Euclidean);
        assert_eq!(config.ef_search, 20);
        assert_eq!(config.seed, None);

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<GraphConfig>(&json).unwrap(), config);
    }

    #[test]
    fn test_center_is_nearest_to_origin() {
        let mut graph = seeded(GraphConfig::default());
        graph.insert("center".into(), vec![0.0, 0.0, 0.0]).unwrap();
        graph.insert("far".into(), vec![1.0, 1.0, 1.0]).unwrap();

        let results = graph.search(&[0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "center");
        assert_eq!(results[0].vector.as_deref(), Some(&[0.0f32, 0.0, 0.0][..]));
    }

    #[test]
    fn test_basic_queries() {
        let mut graph = seeded(GraphConfig::default());
        assert_eq!(graph.dims(), 0);
        assert!(graph.is_empty());

        graph.insert("a".into(), vec![1.0, 2.0]).unwrap();
        assert_eq!(graph.dims(), 2);
        assert_eq!(graph.len(), 1);
        assert!(graph.has(&"a".to_string()));
        assert!(!graph.has(&"b".to_string()));
        assert_eq!(graph.lookup(&"a".to_string()).unwrap(), Some(vec![1.0, 2.0]));
        assert_eq!(graph.lookup(&"b".to_string()).unwrap(), None);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut graph = seeded(GraphConfig::default());
        graph.insert("a".into(), vec![1.0, 2.0, 3.0]).unwrap();
        let err = graph.insert("b".into(), vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            HnswError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(graph.len(), 1);

        assert!(matches!(
            graph.search(&[1.0], 1),
            Err(HnswError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_reinsert_replaces() {
        let (mut graph, data) = build(50, 8, 1);
        let key = data[10].0.clone();
        graph.insert(key.clone(), vec![9.0; 8]).unwrap();
        assert_eq!(graph.len(), 50);
        assert_eq!(graph.lookup(&key).unwrap(), Some(vec![9.0; 8]));
        assert_invariants(&graph);
    }

    #[test]
    fn test_search_results_ascending() {
        let (graph, data) = build(200, 16, 2);
        let results = graph.search(&data[3].1, 10).unwrap();
        assert_eq!(results.len(), 10);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_recall_against_brute_force() {
        let mut graph = Graph::new(GraphConfig {
            distance: DistanceKind::Euclidean,
            ef_search: 64,
            seed: Some(3),
            ..Default::default()
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let data: Vec<Vec<f32>> = (0..300).map(|_| random_vector(8, &mut rng)).collect();
        for (i, v) in data.iter().enumerate() {
            graph.insert(i as u32, v.clone()).unwrap();
        }

        let mut hits = 0;
        for _ in 0..50 {
            let q = random_vector(8, &mut rng);
            let truth = data
                .iter()
                .enumerate()
                .map(|(i, v)| (i as u32, DistanceKind::Euclidean.distance(&q, v)))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
                .unwrap()
                .0;
            if graph.search(&q, 10).unwrap().iter().any(|r| r.key == truth) {
                hits += 1;
            }
        }
        assert!(hits >= 35, "recall@10 too low: {hits}/50");
    }

    #[test]
    fn test_delete_removes_from_results() {
        let mut graph: Graph<u32> = Graph::new(GraphConfig {
            seed: Some(42),
            ..Default::default()
        })
        .unwrap();
        let points: [(u32, [f32; 3]); 5] = [
            (1, [1.0, 0.0, 0.0]),
            (2, [0.0, 1.0, 0.0]),
            (3, [0.0, 0.0, 1.0]),
            (4, [1.0, 1.0, 0.0]),
            (5, [1.0, 0.0, 1.0]),
        ];
        for (k, v) in points {
            graph.insert(k, v.to_vec()).unwrap();
        }
        assert!(graph.delete(&3).unwrap());
        assert!(!graph.has(&3));
        assert!(!graph.delete(&3).unwrap());

        let results = graph.search(&[0.0, 0.0, 1.0], 5).unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.key != 3));
    }

    #[test]
    fn test_delete_everything_resets_graph() {
        let (mut graph, data) = build(40, 4, 4);
        for (key, _) in &data {
            assert!(graph.delete(key).unwrap());
            assert_invariants(&graph);
        }
        assert!(graph.is_empty());
        assert_eq!(graph.layer_count(), 0);
        assert_eq!(graph.dims(), 0);
        assert!(graph.search(&[0.0; 4], 3).unwrap().is_empty());

        graph.insert("fresh".into(), vec![1.0; 7]).unwrap();
        assert_eq!(graph.dims(), 7);
    }

    #[test]
    fn test_filter_excludes_keys() {
        let (graph, data) = build(100, 8, 5);
        let banned = data[0].0.clone();
        let results = graph
            .search_with_filter(&data[0].1, 5, |k: &String| *k != banned)
            .unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.key != banned));
    }

    #[test]
    fn test_zero_k_and_empty_graph() {
        let graph = seeded(GraphConfig::default());
        assert!(graph.search(&[1.0, 2.0], 5).unwrap().is_empty());

        let (graph, data) = build(10, 4, 6);
        assert!(graph.search(&data[0].1, 0).unwrap().is_empty());
        assert_eq!(graph.search(&data[0].1, 50).unwrap().len(), 10);
    }

    #[test]
    fn test_invariants_under_churn() {
        let mut graph = Graph::new(GraphConfig {
            m: 4,
            ml: 0.5,
            seed: Some(9),
            ..Default::default()
        })
        .unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let mut live: Vec<u32> = Vec::new();
        for step in 0..400u32 {
            if live.len() > 10 && rng.gen_bool(0.35) {
                let idx = rng.gen_range(0..live.len());
                let key = live.swap_remove(idx);
                assert!(graph.delete(&key).unwrap());
            } else {
                graph.insert(step, random_vector(6, &mut rng)).unwrap();
                live.push(step);
            }
        }
        assert_eq!(graph.len(), live.len());
        for level in 0..graph.layer_count() {
            assert!(graph.layers[level].len() > 0);
            for id in graph.layers[level].ids() {
                assert!(graph.layers[level].degree(id) <= 4);
                if level > 0 {
                    assert!(graph.layers[level - 1].contains(id));
                }
            }
        }
    }

    #[test]
    fn test_performance_counters() {
        let (graph, data) = build(60, 8, 7);
        let perf = graph.performance();
        assert!(perf.distance_calculations > 0);
        assert!(perf.neighbor_connections > 0);

        graph.reset_performance();
        graph.search(&data[0].1, 3).unwrap();
        let after = graph.performance();
        assert!(after.distance_calculations > 0);
        assert_eq!(after.neighbor_connections, 0);
    }

    #[test]
    fn test_stats_reflect_structure() {
        let (graph, _) = build(120, 8, 8);
        let stats = graph.stats();
        assert_eq!(stats.num_nodes, 120);
        assert_eq!(stats.layer_sizes[0], 120);
        assert_eq!(stats.layer_sizes.len(), graph.layer_count());
        assert!(stats.max_degree <= 16);
        assert!(stats.avg_degree > 0.0);
    }

    // ====== PQ Tests ======

    #[test]
    fn test_train_pq_converts_nodes() {
        let (mut graph, data) = build(64, 8, 10);
        let edges_before = graph.stats().total_edges;

        let mut seen = 0;
        let codebook = graph
            .train_pq_codebook_from_data_with_callback(2, 8, |_, code| {
                assert_eq!(code.len(), 2);
                seen += 1;
            })
            .unwrap();
        assert_eq!(seen, 64);
        assert_eq!(codebook.m(), 2);
        assert!(graph.is_pq_enabled());
        assert_eq!(graph.dims(), 8);
        assert_eq!(graph.stats().total_edges, edges_before);
        assert_eq!(graph.lookup(&data[0].0).unwrap(), None);
        assert_eq!(graph.pq_code(&data[0].0).map(<[u8]>::len), Some(2));

        let results = graph.search(&data[5].1, 5).unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.is_pq && r.vector.is_none()));

        assert!(matches!(
            graph.train_pq_codebook_from_data(2, 8),
            Err(HnswError::State(_))
        ));
    }

    #[test]
    fn test_train_pq_on_empty_graph_fails() {
        let mut graph = seeded(GraphConfig::default());
        assert!(matches!(
            graph.train_pq_codebook_from_data(2, 4),
            Err(HnswError::State(_))
        ));
    }

    #[test]
    fn test_insert_after_pq_mode_encodes() {
        let (mut graph, _) = build(40, 8, 11);
        graph.train_pq_codebook_from_data(4, 8).unwrap();
        graph.insert("late".into(), vec![0.5; 8]).unwrap();
        assert_eq!(graph.len(), 41);
        assert!(graph.pq_code(&"late".to_string()).is_some());
        assert!(matches!(
            graph.insert("bad".into(), vec![0.5; 4]),
            Err(HnswError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_convert_back_to_standard_mode() {
        let (mut graph, data) = build(40, 8, 12);
        graph.train_pq_codebook_from_data(2, 8).unwrap();

        let store: HashMap<String, Vec<f32>> = data.iter().cloned().collect();
        let loader: Arc<dyn VectorLoader<String>> = Arc::new(move |key: &String| {
            store
                .get(key)
                .cloned()
                .ok_or_else(|| LoadError::from(format!("missing {key}")))
        });
        graph.convert_to_standard_mode(loader).unwrap();
        assert!(!graph.is_pq_enabled());
        assert_eq!(graph.lookup(&data[1].0).unwrap(), Some(data[1].1.clone()));

        let results = graph.search(&data[1].1, 5).unwrap();
        assert!(results.iter().all(|r| !r.is_pq && r.vector.is_some()));
        assert!(results.iter().any(|r| r.key == data[1].0));
    }

    #[test]
    fn test_lazy_nodes_load_on_demand() {
        let mut rng = StdRng::seed_from_u64(13);
        let store: HashMap<u32, Vec<f32>> = (0..30).map(|i| (i, random_vector(4, &mut rng))).collect();
        let target = store[&7].clone();
        let loader: Arc<dyn VectorLoader<u32>> = Arc::new(move |key: &u32| {
            store
                .get(key)
                .cloned()
                .ok_or_else(|| LoadError::from("missing"))
        });

        let mut graph: Graph<u32> = Graph::new(GraphConfig {
            seed: Some(13),
            ..Default::default()
        })
        .unwrap();
        graph
            .add((0..30).map(|i| InputNode::lazy(i, loader.clone())))
            .unwrap();
        assert_eq!(graph.len(), 30);
        assert!(graph.search(&target, 5).unwrap().iter().any(|r| r.key == 7));

        let failing: Arc<dyn VectorLoader<u32>> =
            Arc::new(|_: &u32| -> std::result::Result<Vec<f32>, LoadError> {
                Err(LoadError::from("offline"))
            });
        assert!(matches!(
            graph.add([InputNode::lazy(99, failing)]),
            Err(HnswError::VectorLoad { .. })
        ));
        assert!(!graph.has(&99));
    }

    /// Store of 2-d vectors whose loader can be switched offline; key 3 stays readable
    fn switchable_loader(n: u32) -> (Arc<dyn VectorLoader<u32>>, Arc<AtomicBool>) {
        let store: HashMap<u32, Vec<f32>> = (0..n).map(|i| (i, vec![i as f32, (i * i % 7) as f32])).collect();
        let offline = Arc::new(AtomicBool::new(false));
        let flag = offline.clone();
        let loader: Arc<dyn VectorLoader<u32>> = Arc::new(move |key: &u32| -> std::result::Result<Vec<f32>, LoadError> {
            if flag.load(Ordering::SeqCst) && *key != 3 {
                return Err(LoadError::from("offline"));
            }
            store.get(key).cloned().ok_or_else(|| LoadError::from("missing"))
        });
        (loader, offline)
    }

    fn topology(graph: &Graph<u32>) -> Vec<Vec<(u32, Vec<u32>)>> {
        (0..graph.layer_count())
            .map(|level| {
                graph
                    .layer_keys(level)
                    .into_iter()
                    .map(|k| (k, graph.neighbor_keys(level, &k)))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_failed_replace_keeps_old_node() {
        let (loader, offline) = switchable_loader(30);
        let mut graph: Graph<u32> = Graph::new(GraphConfig {
            m: 4,
            seed: Some(8),
            ..Default::default()
        })
        .unwrap();
        graph
            .add((0..30).map(|i| InputNode::lazy(i, loader.clone())))
            .unwrap();
        let before = topology(&graph);

        offline.store(true, Ordering::SeqCst);
        assert!(graph.insert(3, vec![3.0, 6.0]).is_err());

        assert!(graph.has(&3));
        assert_eq!(graph.len(), 30);
        assert_eq!(graph.lookup(&3).unwrap(), Some(vec![3.0, 2.0]));
        assert_eq!(topology(&graph), before);

        offline.store(false, Ordering::SeqCst);
        graph.insert(3, vec![3.0, 6.0]).unwrap();
        assert_eq!(graph.len(), 30);
        assert_eq!(graph.lookup(&3).unwrap(), Some(vec![3.0, 6.0]));
    }

    #[test]
    fn test_delete_survives_failed_repair() {
        let (loader, offline) = switchable_loader(30);
        let mut graph: Graph<u32> = Graph::new(GraphConfig {
            m: 4,
            seed: Some(8),
            ..Default::default()
        })
        .unwrap();
        graph
            .add((0..30).map(|i| InputNode::lazy(i, loader.clone())))
            .unwrap();

        offline.store(true, Ordering::SeqCst);
        assert!(graph.delete(&5).unwrap());
        assert!(!graph.has(&5));
        assert_eq!(graph.len(), 29);
        assert!(!graph.delete(&5).unwrap());

        for level in 0..graph.layer_count() {
            for key in graph.layer_keys(level) {
                let neighbors = graph.neighbor_keys(level, &key);
                assert!(neighbors.len() <= 4);
                assert!(!neighbors.contains(&5));
            }
        }
    }

    #[test]
    fn test_wrong_length_lazy_vector_is_an_error() {
        let long = Arc::new(AtomicBool::new(false));
        let flag = long.clone();
        let loader: Arc<dyn VectorLoader<u32>> = Arc::new(move |key: &u32| -> std::result::Result<Vec<f32>, LoadError> {
            let v = vec![*key as f32, 1.0, -1.0];
            Ok(if flag.load(Ordering::SeqCst) { [v, vec![0.0]].concat() } else { v })
        });
        let mut graph: Graph<u32> = Graph::new(GraphConfig {
            seed: Some(2),
            ..Default::default()
        })
        .unwrap();
        graph
            .add((0..20).map(|i| InputNode::lazy(i, loader.clone())))
            .unwrap();
        assert_eq!(graph.search(&[1.0, 1.0, -1.0], 3).unwrap().len(), 3);

        long.store(true, Ordering::SeqCst);
        assert!(matches!(
            graph.search(&[1.0, 1.0, -1.0], 3),
            Err(HnswError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_k_above_ef_search_widens_candidates() {
        let mut graph = seeded(GraphConfig {
            ef_search: 4,
            ..Default::default()
        });
        let mut rng = StdRng::seed_from_u64(21);
        for i in 0..60 {
            graph.insert(format!("n{i}"), random_vector(3, &mut rng)).unwrap();
        }
        let hits = graph.search(&[0.0, 0.0, 0.0], 25).unwrap();
        assert_eq!(hits.len(), 25);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }
}
