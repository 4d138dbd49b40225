//! K-Means Training for Product Quantization Codebooks
//!
//! Each subspace is clustered independently with Lloyd's algorithm:
//! - Initial centroids are K distinct data points picked at random
//! - Empty clusters are reseeded from a random data point
//! - Iteration stops when no point changes cluster, when the largest
//!   centroid shift drops below `tolerance`, or after `max_iters` rounds
//!
//! # Parallelism
//!
//! ```text
//! sequential:  s0 → s1 → … → sM-1
//! parallel:    [worker pool, ≤ max_workers]  s0 | s1 | … | sM-1
//!              optional inner par_iter over points during assignment
//! ```
//!
//! Workers share nothing mutable; each subspace result is written once.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::{Codebook, PqError, MAX_CENTROIDS};
use crate::distance::l2_squared_f64;

/// Configuration for PQ training
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Number of subspaces (default: 16)
    pub m: usize,

    /// Centroids per subspace, at most 256 (default: 256)
    pub k: usize,

    /// Maximum Lloyd iterations per subspace (default: 50)
    pub max_iters: usize,

    /// Stop once the largest centroid shift is below this (default: 1e-4)
    pub tolerance: f64,

    /// Random seed for reproducibility (None = random)
    pub seed: Option<u64>,

    /// Train subspaces on a worker pool instead of one after another
    pub parallel: bool,

    /// Worker pool size when `parallel` is set
    pub max_workers: usize,

    /// Also parallelize the point-assignment step inside each subspace
    pub parallel_assignment: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            m: 16,
            k: MAX_CENTROIDS,
            max_iters: 50,
            tolerance: 1e-4,
            seed: None,
            parallel: false,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            parallel_assignment: false,
        }
    }
}

/// Train a codebook from a stream of vectors
///
/// The stream is drained completely before training starts, so any
/// iterator works, including a `crossbeam_channel::Receiver`.
///
/// # Returns
/// A codebook with `config.m` subspaces of `config.k` centroids each
pub fn train<I>(vectors: I, config: &TrainingConfig) -> Result<Codebook, PqError>
where
    I: IntoIterator<Item = Vec<f64>>,
{
    if config.m == 0 {
        return Err(PqError::InvalidParameters("M must be positive".into()));
    }
    if config.k == 0 || config.k > MAX_CENTROIDS {
        return Err(PqError::InvalidParameters(format!(
            "K must be in 1..={MAX_CENTROIDS}, got {}",
            config.k
        )));
    }

    let data: Vec<Vec<f64>> = vectors.into_iter().collect();
    let Some(first) = data.first() else {
        return Err(PqError::InsufficientData {
            count: 0,
            minimum: config.k,
        });
    };
    let dims = first.len();
    if let Some(bad) = data.iter().find(|v| v.len() != dims) {
        return Err(PqError::DimensionMismatch {
            expected: dims,
            actual: bad.len(),
        });
    }
    if dims == 0 || dims % config.m != 0 {
        return Err(PqError::InvalidParameters(format!(
            "dimension {dims} is not divisible into {} subspaces",
            config.m
        )));
    }
    if data.len() < config.k {
        return Err(PqError::InsufficientData {
            count: data.len(),
            minimum: config.k,
        });
    }

    let sub_dim = dims / config.m;
    let base_seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());

    let train_subspace = |s: usize| -> Vec<f64> {
        let slices: Vec<&[f64]> = data
            .iter()
            .map(|v| &v[s * sub_dim..(s + 1) * sub_dim])
            .collect();
        kmeans(
            &slices,
            sub_dim,
            config.k,
            config.max_iters,
            config.tolerance,
            base_seed.wrapping_add(s as u64),
            config.parallel_assignment,
        )
    };

    let per_subspace: Vec<Vec<f64>> = if config.parallel {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers.max(1))
            .thread_name(|i| format!("yakhnsw-kmeans-{i}"))
            .build()
            .map_err(|e| PqError::InvalidParameters(format!("failed to build worker pool: {e}")))?;
        pool.install(|| (0..config.m).into_par_iter().map(train_subspace).collect())
    } else {
        (0..config.m).map(train_subspace).collect()
    };

    tracing::info!(
        vectors = data.len(),
        dims,
        m = config.m,
        k = config.k,
        parallel = config.parallel,
        "trained PQ codebook"
    );

    Codebook::new(config.m, config.k, sub_dim, per_subspace.concat())
}

/// Index of the centroid nearest to `point`
#[inline]
fn nearest(point: &[f64], centroids: &[f64], k: usize, dim: usize) -> usize {
    let mut best = 0;
    let mut best_dist = f64::MAX;
    for c in 0..k {
        let dist = l2_squared_f64(point, &centroids[c * dim..(c + 1) * dim]);
        if dist < best_dist {
            best_dist = dist;
            best = c;
        }
    }
    best
}

/// Lloyd's k-means over one subspace, returning `k * dim` centroid values
fn kmeans(
    data: &[&[f64]],
    dim: usize,
    k: usize,
    max_iters: usize,
    tolerance: f64,
    seed: u64,
    parallel_assignment: bool,
) -> Vec<f64> {
    let n = data.len();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut centroids = vec![0.0f64; k * dim];
    for (c, idx) in rand::seq::index::sample(&mut rng, n, k).into_iter().enumerate() {
        centroids[c * dim..(c + 1) * dim].copy_from_slice(data[idx]);
    }

    let mut assignments = vec![usize::MAX; n];
    let mut next = vec![0usize; n];
    let mut sums = vec![0.0f64; k * dim];
    let mut counts = vec![0usize; k];

    for iter in 0..max_iters {
        // Assignment step
        if parallel_assignment {
            data.par_iter()
                .map(|p| nearest(p, &centroids, k, dim))
                .collect_into_vec(&mut next);
        } else {
            for (slot, p) in next.iter_mut().zip(data) {
                *slot = nearest(p, &centroids, k, dim);
            }
        }

        let reassigned = assignments
            .iter()
            .zip(&next)
            .filter(|(old, new)| old != new)
            .count();
        std::mem::swap(&mut assignments, &mut next);
        if reassigned == 0 {
            tracing::debug!("K-means converged after {} iterations (stable assignment)", iter);
            break;
        }

        // Update step
        sums.fill(0.0);
        counts.fill(0);
        for (p, &c) in data.iter().zip(&assignments) {
            counts[c] += 1;
            for (acc, &x) in sums[c * dim..(c + 1) * dim].iter_mut().zip(p.iter()) {
                *acc += x;
            }
        }

        let mut max_shift = 0.0f64;
        for c in 0..k {
            let new_centroid: Vec<f64> = if counts[c] > 0 {
                let count = counts[c] as f64;
                sums[c * dim..(c + 1) * dim].iter().map(|x| x / count).collect()
            } else {
                data[rng.gen_range(0..n)].to_vec()
            };
            let old = &mut centroids[c * dim..(c + 1) * dim];
            max_shift = max_shift.max(l2_squared_f64(old, &new_centroid).sqrt());
            old.copy_from_slice(&new_centroid);
        }

        if max_shift < tolerance {
            tracing::debug!("K-means converged after {} iterations", iter + 1);
            break;
        }
    }

    centroids
}
