//! YakHNSW CLI
//!
//! Builds, inspects and queries `YAKHNSW` graph snapshots.
//!
//! # Usage
//!
//! ```bash
//! # Build a snapshot from a JSON object of key -> vector
//! yakhnsw build --input vectors.json --output graph.yak --m 16 --distance euclidean
//!
//! # Same, compressed with an 8-subspace, 64-centroid PQ codebook
//! yakhnsw build --input vectors.json --output graph.yak --pq-m 8 --pq-k 64
//!
//! # Query it
//! yakhnsw search --graph graph.yak --query 0.1,0.2,0.3 --k 5
//!
//! # Train a standalone codebook
//! yakhnsw train-codebook --input vectors.json --output codebook.bin --m 8 --k 64
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use yakhnsw::pq::{train, Codebook, TrainingConfig};
use yakhnsw::{DistanceKind, Graph, GraphConfig, InputNode};

#[derive(Parser)]
#[command(name = "yakhnsw")]
#[command(about = "HNSW vector graph with product quantization")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a graph snapshot from a JSON vector file
    ///
    /// Input format: JSON object {"key": [0.1, ...], ...}
    Build {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Output snapshot file
        #[arg(short, long)]
        output: PathBuf,

        /// Graph configuration as JSON; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Max neighbors per node per layer
        #[arg(short, long)]
        m: Option<usize>,

        /// Candidate list size used while searching
        #[arg(long)]
        ef: Option<usize>,

        /// cosine or euclidean
        #[arg(short, long, value_parser = parse_distance)]
        distance: Option<DistanceKind>,

        /// Seed for level sampling
        #[arg(long)]
        seed: Option<u64>,

        /// PQ subspaces; enables compression together with --pq-k
        #[arg(long, requires = "pq_k")]
        pq_m: Option<usize>,

        /// PQ centroids per subspace (at most 256)
        #[arg(long, requires = "pq_m")]
        pq_k: Option<usize>,
    },

    /// Search a snapshot for the nearest neighbors of a vector
    Search {
        /// Snapshot file
        #[arg(short, long)]
        graph: PathBuf,

        /// Query vector (comma separated floats)
        #[arg(short, long, value_parser = parse_vector, value_delimiter = ',', allow_hyphen_values = true)]
        query: Vec<f32>,

        /// Number of results
        #[arg(short, long, default_value = "10")]
        k: usize,

        /// Metric the snapshot was built with
        #[arg(short, long, default_value = "cosine", value_parser = parse_distance)]
        distance: DistanceKind,
    },

    /// Print structural statistics of a snapshot
    Stats {
        #[arg(short, long)]
        graph: PathBuf,

        #[arg(short, long, default_value = "cosine", value_parser = parse_distance)]
        distance: DistanceKind,
    },

    /// Render a snapshot as Graphviz DOT
    Dot {
        #[arg(short, long)]
        graph: PathBuf,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Label edges with their distances
        #[arg(long)]
        distances: bool,

        #[arg(short, long, default_value = "cosine", value_parser = parse_distance)]
        distance: DistanceKind,
    },

    /// Train a PQ codebook from a JSON vector file
    TrainCodebook {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Subspaces
        #[arg(short, long, default_value = "16")]
        m: usize,

        /// Centroids per subspace
        #[arg(short, long, default_value = "256")]
        k: usize,

        #[arg(long, default_value = "50")]
        max_iters: usize,

        #[arg(long)]
        seed: Option<u64>,

        /// Train subspaces in parallel
        #[arg(long)]
        parallel: bool,
    },
}

fn parse_vector(s: &str) -> Result<f32, String> {
    s.trim()
        .parse::<f32>()
        .map_err(|e| format!("invalid float {s:?}: {e}"))
}

fn parse_distance(s: &str) -> Result<DistanceKind, String> {
    s.parse::<DistanceKind>().map_err(|e| e.to_string())
}

fn read_vectors(path: &Path) -> anyhow::Result<BTreeMap<String, Vec<f32>>> {
    let file = File::open(path).with_context(|| format!("opening {path:?}"))?;
    let vectors: BTreeMap<String, Vec<f32>> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {path:?} as a JSON object of vectors"))?;
    if vectors.is_empty() {
        anyhow::bail!("No vectors found in input");
    }
    let dims = vectors.values().next().map_or(0, Vec::len);
    for (key, vector) in &vectors {
        if vector.len() != dims {
            anyhow::bail!("Vector {key:?} has dimension {}, expected {dims}", vector.len());
        }
    }
    Ok(vectors)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GraphConfig> {
    let Some(path) = path else {
        return Ok(GraphConfig::default());
    };
    let file = File::open(path).with_context(|| format!("opening {path:?}"))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing config {path:?}"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            config,
            m,
            ef,
            distance,
            seed,
            pq_m,
            pq_k,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(m) = m {
                config.m = m;
            }
            if let Some(ef) = ef {
                config.ef_search = ef;
            }
            if let Some(distance) = distance {
                config.distance = distance;
            }
            if seed.is_some() {
                config.seed = seed;
            }

            let vectors = read_vectors(&input)?;
            tracing::info!(count = vectors.len(), m = config.m, distance = %config.distance, "building graph");

            let mut graph: Graph<String> = Graph::new(config)?;
            graph.add(vectors.into_iter().map(|(key, vector)| InputNode::new(key, vector)))?;

            if let (Some(pq_m), Some(pq_k)) = (pq_m, pq_k) {
                let codebook = graph
                    .train_pq_codebook_from_data(pq_m, pq_k)
                    .context("training PQ codebook")?;
                tracing::info!(
                    m = codebook.m(),
                    k = codebook.k(),
                    "graph compressed to {} bytes per node",
                    codebook.code_size()
                );
            }

            graph.save(&output).with_context(|| format!("writing {output:?}"))?;
            let stats = graph.stats();
            println!(
                "Built graph: {} nodes, {} layers, {} edges -> {:?}",
                stats.num_nodes,
                stats.layer_sizes.len(),
                stats.total_edges,
                output
            );
        }

        Commands::Search {
            graph,
            query,
            k,
            distance,
        } => {
            let graph: Graph<String> =
                Graph::load(&graph, distance).with_context(|| format!("loading {graph:?}"))?;
            let results = graph.search(&query, k)?;
            println!("Results:");
            for (rank, hit) in results.iter().enumerate() {
                println!("  {:>3}. {}  distance={:.6}", rank + 1, hit.key, hit.distance);
            }
        }

        Commands::Stats { graph, distance } => {
            let graph: Graph<String> =
                Graph::load(&graph, distance).with_context(|| format!("loading {graph:?}"))?;
            println!("{}", serde_json::to_string_pretty(&graph.stats())?);
        }

        Commands::Dot {
            graph,
            output,
            distances,
            distance,
        } => {
            let graph: Graph<String> =
                Graph::load(&graph, distance).with_context(|| format!("loading {graph:?}"))?;
            let dot = if distances {
                graph.debug_dump_dot()?
            } else {
                graph.dump_dot()
            };
            match output {
                Some(path) => {
                    let mut w = BufWriter::new(
                        File::create(&path).with_context(|| format!("creating {path:?}"))?,
                    );
                    w.write_all(dot.as_bytes())?;
                    w.flush()?;
                }
                None => print!("{dot}"),
            }
        }

        Commands::TrainCodebook {
            input,
            output,
            m,
            k,
            max_iters,
            seed,
            parallel,
        } => {
            let vectors = read_vectors(&input)?;
            let config = TrainingConfig {
                m,
                k,
                max_iters,
                seed,
                parallel,
                ..Default::default()
            };
            let start = std::time::Instant::now();
            let codebook: Codebook = train(
                vectors
                    .into_values()
                    .map(|v| v.into_iter().map(f64::from).collect()),
                &config,
            )
            .context("training codebook")?;
            tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "codebook trained");
            codebook.save(&output).with_context(|| format!("writing {output:?}"))?;
            println!(
                "Codebook: {} subspaces x {} centroids, {} dims -> {:?}",
                codebook.m(),
                codebook.k(),
                codebook.dims(),
                output
            );
        }
    }

    Ok(())
}
