//! Thread-safe front end for a [`Graph`]
//!
//! ```text
//!  callers ──▶ unbounded FIFO ──▶ dispatcher thread
//!                                   │ write: exclusive lock, run, hook, signal
//!                                   │ read:  shared lock, then hand off to a worker thread
//! ```
//!
//! The dispatcher takes the shared lock for a read *before* handing it off,
//! so a later write waits for every earlier read, and reads never wait for
//! each other. Panics inside an operation are caught and logged; the caller
//! is released and receives the operation's neutral value (empty results,
//! `false`, `None`). Operations with no neutral value report a state error.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::{Mutex, RwLock};

use crate::error::{HnswError, Result};
use crate::hnsw::{Graph, GraphStats, InputNode, PerformanceStats, SearchResult, VectorLoader};
use crate::key::{GraphKey, Key};
use crate::persist::Persistent;
use crate::pq::Codebook;

type Completion = Box<dyn FnOnce() + Send>;
type WriteOp<K> = Box<dyn FnOnce(&mut Graph<K>) -> Completion + Send>;
type ReadOp<K> = Box<dyn FnOnce(&Graph<K>) + Send>;

/// Called after every completed write, under the write lock
pub type LayersChangeHook<K> = Arc<dyn Fn(&Graph<K>) + Send + Sync>;

enum Op<K> {
    Write(WriteOp<K>),
    Read(ReadOp<K>),
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    cause
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| cause.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn aborted() -> HnswError {
    HnswError::State("graph operation aborted by a panic".into())
}

/// Single-writer, multi-reader owner of a graph
pub struct GraphWrapper<K: Key> {
    sender: Option<Sender<Op<K>>>,
    dispatcher: Option<JoinHandle<()>>,
    hook: Arc<Mutex<Option<LayersChangeHook<K>>>>,
}

impl<K: Key> GraphWrapper<K> {
    /// Take ownership of `graph` and start the dispatcher thread
    pub fn new(graph: Graph<K>) -> Result<Self> {
        let (sender, receiver) = unbounded::<Op<K>>();
        let graph = Arc::new(RwLock::new(graph));
        let hook: Arc<Mutex<Option<LayersChangeHook<K>>>> = Arc::new(Mutex::new(None));
        let dispatcher_hook = hook.clone();

        let dispatcher = thread::Builder::new()
            .name("yakhnsw-dispatcher".into())
            .spawn(move || {
                while let Ok(op) = receiver.recv() {
                    match op {
                        Op::Write(run) => {
                            let mut guard = graph.write();
                            let completion = match catch_unwind(AssertUnwindSafe(|| run(&mut guard))) {
                                Ok(completion) => completion,
                                Err(cause) => {
                                    tracing::error!(panic = panic_message(&*cause), "graph write panicked");
                                    continue;
                                }
                            };
                            let hook = dispatcher_hook.lock().clone();
                            if let Some(hook) = hook {
                                if let Err(cause) = catch_unwind(AssertUnwindSafe(|| hook(&guard))) {
                                    tracing::error!(
                                        panic = panic_message(&*cause),
                                        "layers-change hook panicked"
                                    );
                                }
                            }
                            drop(guard);
                            completion();
                        }
                        Op::Read(run) => {
                            let guard = graph.read_arc();
                            let spawned = thread::Builder::new()
                                .name("yakhnsw-read".into())
                                .spawn(move || {
                                    if let Err(cause) = catch_unwind(AssertUnwindSafe(|| run(&guard))) {
                                        tracing::error!(
                                            panic = panic_message(&*cause),
                                            "graph read panicked"
                                        );
                                    }
                                });
                            if let Err(e) = spawned {
                                tracing::error!(error = %e, "failed to spawn read worker");
                            }
                        }
                    }
                }
                tracing::debug!("graph dispatcher stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            dispatcher: Some(dispatcher),
            hook,
        })
    }

    fn submit(&self, op: Op<K>) -> bool {
        match &self.sender {
            Some(sender) => sender.send(op).is_ok(),
            None => false,
        }
    }

    /// Run `f` with exclusive access; `None` if it panicked
    pub fn write<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Graph<K>) -> R + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let op: WriteOp<K> = Box::new(move |graph| {
            let out = f(graph);
            let done: Completion = Box::new(move || {
                let _ = tx.send(out);
            });
            done
        });
        if !self.submit(Op::Write(op)) {
            return None;
        }
        rx.recv().ok()
    }

    /// Run `f` with shared access; `None` if it panicked
    pub fn read<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&Graph<K>) -> R + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let op: ReadOp<K> = Box::new(move |graph| {
            let _ = tx.send(f(graph));
        });
        if !self.submit(Op::Read(op)) {
            return None;
        }
        rx.recv().ok()
    }

    /// Install the hook run after every write
    pub fn set_on_layers_change<F>(&self, hook: F)
    where
        F: Fn(&Graph<K>) + Send + Sync + 'static,
    {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    pub fn clear_on_layers_change(&self) {
        *self.hook.lock() = None;
    }

    // ====== Writes ======

    pub fn add(&self, nodes: Vec<InputNode<K>>) -> Result<()> {
        self.write(move |g| g.add(nodes)).unwrap_or(Ok(()))
    }

    pub fn insert(&self, key: K, vector: Vec<f32>) -> Result<()> {
        self.write(move |g| g.insert(key, vector)).unwrap_or(Ok(()))
    }

    pub fn delete(&self, key: K) -> Result<bool> {
        self.write(move |g| g.delete(&key)).unwrap_or(Ok(false))
    }

    pub fn train_pq_codebook_from_data(&self, m: usize, k: usize) -> Result<Arc<Codebook>> {
        self.write(move |g| g.train_pq_codebook_from_data(m, k))
            .unwrap_or_else(|| Err(aborted()))
    }

    pub fn set_pq_codebook(&self, codebook: Arc<Codebook>) -> Result<()> {
        self.write(move |g| g.set_pq_codebook(codebook)).unwrap_or(Ok(()))
    }

    pub fn convert_to_standard_mode(&self, loader: Arc<dyn VectorLoader<K>>) -> Result<()> {
        self.write(move |g| g.convert_to_standard_mode(loader)).unwrap_or(Ok(()))
    }

    // ====== Reads ======

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult<K>>> {
        let query = query.to_vec();
        self.read(move |g| g.search(&query, k)).unwrap_or(Ok(Vec::new()))
    }

    pub fn search_with_filter<F>(&self, query: &[f32], k: usize, filter: F) -> Result<Vec<SearchResult<K>>>
    where
        F: Fn(&K) -> bool + Send + 'static,
    {
        let query = query.to_vec();
        self.read(move |g| g.search_with_filter(&query, k, filter))
            .unwrap_or(Ok(Vec::new()))
    }

    pub fn search_with_distance_and_filter<F>(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<F>,
    ) -> Result<Vec<SearchResult<K>>>
    where
        F: Fn(&K) -> bool + Send + 'static,
    {
        let query = query.to_vec();
        self.read(move |g| {
            g.search_with_distance_and_filter(&query, k, filter.as_ref().map(|f| f as &dyn Fn(&K) -> bool))
        })
        .unwrap_or(Ok(Vec::new()))
    }

    pub fn len(&self) -> usize {
        self.read(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, key: K) -> bool {
        self.read(move |g| g.has(&key)).unwrap_or(false)
    }

    pub fn lookup(&self, key: K) -> Result<Option<Vec<f32>>> {
        self.read(move |g| g.lookup(&key)).unwrap_or(Ok(None))
    }

    pub fn dims(&self) -> usize {
        self.read(|g| g.dims()).unwrap_or(0)
    }

    pub fn is_pq_enabled(&self) -> bool {
        self.read(|g| g.is_pq_enabled()).unwrap_or(false)
    }

    pub fn stats(&self) -> Option<GraphStats> {
        self.read(|g| g.stats())
    }

    pub fn performance(&self) -> Option<PerformanceStats> {
        self.read(|g| g.performance())
    }

    pub fn dump_dot(&self) -> String {
        self.read(|g| g.dump_dot()).unwrap_or_default()
    }
}

impl<K: GraphKey> GraphWrapper<K> {
    pub fn to_persistent(&self) -> Result<Persistent<K>> {
        self.read(|g| g.to_persistent()).unwrap_or_else(|| Err(aborted()))
    }

    pub fn to_binary(&self) -> Result<Vec<u8>> {
        self.read(|g| g.to_binary()).unwrap_or_else(|| Err(aborted()))
    }
}

impl<K: Key> Drop for GraphWrapper<K> {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                tracing::error!("graph dispatcher thread panicked");
            }
        }
    }
}
