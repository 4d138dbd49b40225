//! Distance functions
//!
//! The graph supports a closed set of metrics, selected by [`DistanceKind`]
//! and serialized by its canonical name:
//!
//! | Kind        | Formula                          | Range    |
//! |-------------|----------------------------------|----------|
//! | `cosine`    | `1 - (a · b) / (‖a‖ ‖b‖)`         | `[0, 2]` |
//! | `euclidean` | `sqrt(Σ (aᵢ - bᵢ)²)`             | `[0, ∞)` |
//!
//! All accumulation happens in `f64` so that the raw-vector path and the
//! PQ path (whose centroids are `f64`) produce comparable numbers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Metric used to compare two vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceKind {
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceKind {
    /// Canonical name written to the streaming export format
    pub fn name(self) -> &'static str {
        match self {
            DistanceKind::Cosine => "cosine",
            DistanceKind::Euclidean => "euclidean",
        }
    }

    /// Distance between two raw vectors of equal length
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceKind::Cosine => cosine_distance(a, b),
            DistanceKind::Euclidean => euclidean_distance(a, b),
        }
    }
}

impl fmt::Display for DistanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for an unrecognised metric name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDistance(pub String);

impl fmt::Display for UnknownDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown distance function {:?}", self.0)
    }
}

impl std::error::Error for UnknownDistance {}

impl FromStr for DistanceKind {
    type Err = UnknownDistance;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(DistanceKind::Cosine),
            "euclidean" => Ok(DistanceKind::Euclidean),
            other => Err(UnknownDistance(other.to_string())),
        }
    }
}

/// Dot product accumulated in f64
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

/// Squared L2 distance accumulated in f64
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum()
}

#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    l2_distance_squared(a, b).sqrt()
}

/// Cosine distance, `1 - cos(θ)`
///
/// Two zero vectors are at distance 0; a zero vector against any non-zero
/// vector is at distance 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();
    cosine_from_parts(dot, norm_a, norm_b)
}

/// Cosine distance from a precomputed dot product and the two norms
#[inline]
pub fn cosine_from_parts(dot: f64, norm_a: f64, norm_b: f64) -> f64 {
    match (norm_a == 0.0, norm_b == 0.0) {
        (true, true) => 0.0,
        (true, false) | (false, true) => 1.0,
        (false, false) => 1.0 - (dot / (norm_a * norm_b)).clamp(-1.0, 1.0),
    }
}

/// Squared L2 distance between f64 slices (PQ subspaces)
#[inline]
pub(crate) fn l2_squared_f64(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub(crate) fn dot_f64(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_known_value() {
        let d = euclidean_distance(&[0.0, 0.0, 0.0], &[1.0, 2.0, 2.0]);
        assert!((d - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_orthogonal_and_parallel() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_distance(&[1.0, 1.0], &[2.0, 2.0]).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_zero_vectors() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 1.0]), 1.0);
    }

    #[test]
    fn test_name_roundtrip() {
        for kind in [DistanceKind::Cosine, DistanceKind::Euclidean] {
            assert_eq!(kind.name().parse::<DistanceKind>().unwrap(), kind);
        }
        let err = "manhattan".parse::<DistanceKind>().unwrap_err();
        assert_eq!(err, UnknownDistance("manhattan".into()));
    }
}
