//! Node storage
//!
//! Nodes live in an arena and are addressed by a dense [`NodeId`]. Layers
//! only store ids, so neighbor sets never hold references into each other.
//! A node carries either a raw vector (owned, or fetched through a
//! [`VectorLoader`] on every access) or a PQ code, never both.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::error::{HnswError, LoadError, Result};
use crate::key::Key;

/// Handle of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// External source of raw vectors for out-of-core nodes
pub trait VectorLoader<K>: Send + Sync {
    fn load(&self, key: &K) -> std::result::Result<Vec<f32>, LoadError>;
}

impl<K, F> VectorLoader<K> for F
where
    F: Fn(&K) -> std::result::Result<Vec<f32>, LoadError> + Send + Sync,
{
    fn load(&self, key: &K) -> std::result::Result<Vec<f32>, LoadError> {
        self(key)
    }
}

/// Where a standard node's vector comes from
#[derive(Clone)]
pub enum VectorAccessor<K> {
    Owned(Arc<[f32]>),
    Lazy(Arc<dyn VectorLoader<K>>),
}

impl<K: Key> VectorAccessor<K> {
    /// Fetch the vector for `key`, borrowing when it is held in memory
    pub fn load(&self, key: &K) -> Result<Cow<'_, [f32]>> {
        match self {
            VectorAccessor::Owned(v) => Ok(Cow::Borrowed(&v[..])),
            VectorAccessor::Lazy(loader) => {
                loader
                    .load(key)
                    .map(Cow::Owned)
                    .map_err(|source| HnswError::VectorLoad {
                        key: format!("{key:?}"),
                        source,
                    })
            }
        }
    }

    /// Like [`load`](Self::load), but a vector of the wrong length is an
    /// error rather than something the distance kernels have to cope with
    pub fn load_exact(&self, key: &K, dims: usize) -> Result<Cow<'_, [f32]>> {
        let v = self.load(key)?;
        if v.len() != dims {
            return Err(HnswError::DimensionMismatch {
                expected: dims,
                actual: v.len(),
            });
        }
        Ok(v)
    }
}

impl<K> fmt::Debug for VectorAccessor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorAccessor::Owned(v) => f.debug_tuple("Owned").field(&v.len()).finish(),
            VectorAccessor::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

/// Payload of a node
#[derive(Debug, Clone)]
pub enum NodeData<K> {
    Standard(VectorAccessor<K>),
    Pq(Box<[u8]>),
}

/// A node as stored in the arena
#[derive(Debug, Clone)]
pub struct NodeEntry<K> {
    key: K,
    data: NodeData<K>,
}

impl<K: Key> NodeEntry<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn data(&self) -> &NodeData<K> {
        &self.data
    }

    pub fn is_pq(&self) -> bool {
        matches!(self.data, NodeData::Pq(_))
    }

    pub fn pq_code(&self) -> Option<&[u8]> {
        match &self.data {
            NodeData::Pq(code) => Some(&code[..]),
            NodeData::Standard(_) => None,
        }
    }

    /// Raw vector of a standard node
    ///
    /// PQ nodes keep no raw vector and report a state error.
    pub fn vector(&self) -> Result<Cow<'_, [f32]>> {
        match &self.data {
            NodeData::Standard(accessor) => accessor.load(&self.key),
            NodeData::Pq(_) => Err(HnswError::State(format!(
                "node {:?} is PQ-encoded and has no raw vector",
                self.key
            ))),
        }
    }
}

/// Node to be inserted into a graph
#[derive(Debug, Clone)]
pub struct InputNode<K> {
    pub key: K,
    pub vector: VectorAccessor<K>,
}

impl<K> InputNode<K> {
    pub fn new(key: K, vector: Vec<f32>) -> Self {
        Self {
            key,
            vector: VectorAccessor::Owned(vector.into()),
        }
    }

    /// Node whose vector is fetched through `loader` whenever it is needed
    pub fn lazy(key: K, loader: Arc<dyn VectorLoader<K>>) -> Self {
        Self {
            key,
            vector: VectorAccessor::Lazy(loader),
        }
    }
}

/// Slot storage with id reuse and a key index
#[derive(Debug, Clone)]
pub(crate) struct NodeArena<K> {
    slots: Vec<Option<NodeEntry<K>>>,
    free: Vec<u32>,
    by_key: HashMap<K, NodeId>,
}

impl<K> Default for NodeArena<K> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
        }
    }
}

impl<K: Key> NodeArena<K> {
    /// Store a node; the key must not already be present
    pub fn insert(&mut self, key: K, data: NodeData<K>) -> NodeId {
        debug_assert!(!self.by_key.contains_key(&key));
        let entry = NodeEntry {
            key: key.clone(),
            data,
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(entry);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(entry));
                NodeId((self.slots.len() - 1) as u32)
            }
        };
        self.by_key.insert(key, id);
        id
    }

    pub fn remove(&mut self, id: NodeId) -> Option<NodeEntry<K>> {
        let entry = self.slots.get_mut(id.index())?.take()?;
        self.by_key.remove(&entry.key);
        self.free.push(id.0);
        Some(entry)
    }

    #[inline]
    pub fn lookup(&self, key: &K) -> Option<NodeId> {
        self.by_key.get(key).copied()
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&NodeEntry<K>> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Swap in a new payload, handing back the previous one
    pub fn set_data(&mut self, id: NodeId, data: NodeData<K>) -> Option<NodeData<K>> {
        match self.slots.get_mut(id.index()) {
            Some(Some(entry)) => Some(std::mem::replace(&mut entry.data, data)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Upper bound on ids handed out so far
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeEntry<K>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (NodeId(i as u32), e)))
    }
}

impl<K: Key> Index<NodeId> for NodeArena<K> {
    type Output = NodeEntry<K>;

    fn index(&self, id: NodeId) -> &Self::Output {
        match self.get(id) {
            Some(entry) => entry,
            None => panic!("dangling node handle {id:?}"),
        }
    }
}
