//! Trained PQ centroids

use super::{PqError, MAX_CENTROIDS};

/// Per-subspace centroids produced by training
///
/// Stored flattened as `centroids[(s * k + c) * sub_vector_dim + d]`.
/// A codebook is immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Codebook {
    m: usize,
    k: usize,
    sub_vector_dim: usize,
    centroids: Vec<f64>,
}

impl Codebook {
    /// Build a codebook from a flattened centroid buffer
    ///
    /// # Parameters
    /// - `m`: number of subspaces
    /// - `k`: centroids per subspace (1..=256)
    /// - `sub_vector_dim`: length of each centroid
    /// - `centroids`: `m * k * sub_vector_dim` values
    pub fn new(
        m: usize,
        k: usize,
        sub_vector_dim: usize,
        centroids: Vec<f64>,
    ) -> Result<Self, PqError> {
        if m == 0 || sub_vector_dim == 0 {
            return Err(PqError::CodebookShape(format!(
                "M ({m}) and SubVectorDim ({sub_vector_dim}) must be positive"
            )));
        }
        if k == 0 || k > MAX_CENTROIDS {
            return Err(PqError::CodebookShape(format!(
                "K must be in 1..={MAX_CENTROIDS}, got {k}"
            )));
        }
        let expected = m
            .checked_mul(k)
            .and_then(|n| n.checked_mul(sub_vector_dim))
            .ok_or_else(|| PqError::CodebookShape(format!("M={m} K={k} SubVectorDim={sub_vector_dim} overflows")))?;
        if centroids.len() != expected {
            return Err(PqError::CodebookShape(format!(
                "expected {expected} centroid values for M={m} K={k} SubVectorDim={sub_vector_dim}, got {}",
                centroids.len()
            )));
        }
        Ok(Self {
            m,
            k,
            sub_vector_dim,
            centroids,
        })
    }

    /// Build from the nested `[M][K][SubVectorDim]` form used on the wire
    pub fn from_nested(nested: Vec<Vec<Vec<f64>>>) -> Result<Self, PqError> {
        let m = nested.len();
        let k = nested.first().map(Vec::len).unwrap_or(0);
        let sub_vector_dim = nested
            .first()
            .and_then(|s| s.first())
            .map(Vec::len)
            .unwrap_or(0);

        let mut flat = Vec::with_capacity(m.saturating_mul(k).saturating_mul(sub_vector_dim).min(1 << 20));
        for (s, subspace) in nested.into_iter().enumerate() {
            if subspace.len() != k {
                return Err(PqError::CodebookShape(format!(
                    "subspace {s} has {} centroids, expected {k}",
                    subspace.len()
                )));
            }
            for (c, centroid) in subspace.into_iter().enumerate() {
                if centroid.len() != sub_vector_dim {
                    return Err(PqError::CodebookShape(format!(
                        "centroid {c} of subspace {s} has length {}, expected {sub_vector_dim}",
                        centroid.len()
                    )));
                }
                flat.extend(centroid);
            }
        }
        Self::new(m, k, sub_vector_dim, flat)
    }

    /// Nested `[M][K][SubVectorDim]` copy of the centroids
    pub fn to_nested(&self) -> Vec<Vec<Vec<f64>>> {
        (0..self.m)
            .map(|s| (0..self.k).map(|c| self.centroid(s, c).to_vec()).collect())
            .collect()
    }

    #[inline]
    pub fn m(&self) -> usize {
        self.m
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn sub_vector_dim(&self) -> usize {
        self.sub_vector_dim
    }

    /// Dimension of the vectors this codebook encodes
    #[inline]
    pub fn dims(&self) -> usize {
        self.m * self.sub_vector_dim
    }

    /// Bytes per encoded vector
    #[inline]
    pub fn code_size(&self) -> usize {
        self.m
    }

    /// Centroid `c` of subspace `s`
    #[inline]
    pub fn centroid(&self, s: usize, c: usize) -> &[f64] {
        let offset = (s * self.k + c) * self.sub_vector_dim;
        &self.centroids[offset..offset + self.sub_vector_dim]
    }

    pub fn centroids(&self) -> &[f64] {
        &self.centroids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_roundtrip() {
        let nested = vec![
            vec![vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]],
            vec![vec![6.0, 7.0], vec![8.0, 9.0], vec![10.0, 11.0]],
        ];
        let cb = Codebook::from_nested(nested.clone()).unwrap();
        assert_eq!(cb.m(), 2);
        assert_eq!(cb.k(), 3);
        assert_eq!(cb.sub_vector_dim(), 2);
        assert_eq!(cb.dims(), 4);
        assert_eq!(cb.centroid(1, 2), &[10.0, 11.0]);
        assert_eq!(cb.to_nested(), nested);
    }

    #[test]
    fn test_ragged_nested_rejected() {
        let ragged = vec![vec![vec![0.0, 1.0]], vec![vec![2.0, 3.0], vec![4.0, 5.0]]];
        assert!(matches!(
            Codebook::from_nested(ragged),
            Err(PqError::CodebookShape(_))
        ));

        let short = vec![vec![vec![0.0, 1.0], vec![2.0]]];
        assert!(matches!(
            Codebook::from_nested(short),
            Err(PqError::CodebookShape(_))
        ));
    }

    #[test]
    fn test_shape_limits() {
        assert!(Codebook::new(1, 257, 1, vec![0.0; 257]).is_err());
        assert!(Codebook::new(0, 4, 1, vec![]).is_err());
        assert!(Codebook::new(2, 2, 2, vec![0.0; 7]).is_err());
        assert!(Codebook::new(2, 2, 2, vec![0.0; 8]).is_ok());
    }
}
