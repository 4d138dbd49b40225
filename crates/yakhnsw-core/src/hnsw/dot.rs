//! Graphviz rendering
//!
//! One `subgraph cluster_N` per layer, top layer first. Node ids are
//! `l{layer}_{handle}` so the same key can appear in every layer it occupies.

use std::fmt::Write;

use super::graph::Graph;
use super::node::NodeId;
use crate::error::Result;
use crate::key::Key;

fn label<K: Key>(key: &K) -> String {
    format!("{key:?}").replace('\\', "\\\\").replace('"', "\\\"")
}

impl<K: Key> Graph<K> {
    /// Render the graph topology in DOT format
    pub fn dump_dot(&self) -> String {
        self.render(|_, _| Ok(None)).unwrap_or_default()
    }

    /// Like [`dump_dot`](Self::dump_dot), with every edge labelled by its distance
    pub fn debug_dump_dot(&self) -> Result<String> {
        let metric = self.metric();
        self.render(|a, b| metric.between(a, b).map(Some))
    }

    fn render<F>(&self, mut edge_label: F) -> Result<String>
    where
        F: FnMut(NodeId, NodeId) -> Result<Option<f64>>,
    {
        let mut out = String::from("digraph hnsw {\n  rankdir=LR;\n  node [shape=box];\n");
        for (level, layer) in self.layers.iter().enumerate().rev() {
            let _ = writeln!(out, "  subgraph cluster_{level} {{");
            let _ = writeln!(out, "    label=\"layer {level}\";");
            for id in layer.ids() {
                let _ = writeln!(
                    out,
                    "    l{level}_{} [label=\"{}\"];",
                    id.index(),
                    label(self.arena[id].key())
                );
            }
            for id in layer.ids() {
                for neighbor in layer.neighbors(id) {
                    match edge_label(id, neighbor)? {
                        Some(d) => {
                            let _ = writeln!(
                                out,
                                "    l{level}_{} -> l{level}_{} [label=\"{d:.4}\"];",
                                id.index(),
                                neighbor.index()
                            );
                        }
                        None => {
                            let _ = writeln!(
                                out,
                                "    l{level}_{} -> l{level}_{};",
                                id.index(),
                                neighbor.index()
                            );
                        }
                    }
                }
            }
            out.push_str("  }\n");
        }
        out.push_str("}\n");
        Ok(out)
    }
}
