//! Product Quantization (PQ)
//!
//! Compresses a `D`-dimensional vector into `M` bytes by splitting it into `M`
//! sub-vectors and replacing each with the index of its nearest centroid in a
//! per-subspace codebook of `K ≤ 256` entries.
//!
//! # Architecture
//!
//! ```text
//! Vector [f32; D] → split into M sub-vectors of D/M floats each
//!                    ↓
//! Each sub-vector → nearest centroid index (u8)
//!                    ↓
//! PQ Code [u8; M]   (compression ratio = (D/M) × 8 against f64 storage)
//! ```
//!
//! # Distance Computation
//!
//! ```text
//! Query → distance table: [M subspaces × K squared distances]
//!       → for any PQ code, distance = sqrt(sum of M table lookups)
//! ```
//!
//! Cosine uses a dot-product table plus the per-centroid squared norms.

mod codebook;
mod quantizer;
mod training;

pub use codebook::Codebook;
pub use quantizer::{DistanceTable, DotProductTable, Quantizer};
pub use training::{train, TrainingConfig};

/// Largest centroid count addressable by a one-byte code
pub const MAX_CENTROIDS: usize = 256;

/// Errors from PQ training, encoding and distance computation
#[derive(Debug, thiserror::Error)]
pub enum PqError {
    #[error("invalid PQ parameters: {0}")]
    InvalidParameters(String),

    #[error("PQ dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("codebook shape error: {0}")]
    CodebookShape(String),

    #[error("Not enough training data: {count} vectors (minimum: {minimum})")]
    InsufficientData { count: usize, minimum: usize },

    #[error("PQ code length mismatch: expected {expected}, got {actual}")]
    CodeLength { expected: usize, actual: usize },

    #[error("PQ code byte {code} in subspace {subspace} exceeds centroid count {k}")]
    InvalidCode { subspace: usize, code: u8, k: usize },
}
