//! Encoding, decoding and distance computation against a [`Codebook`]

use std::sync::Arc;

use super::{Codebook, PqError};
use crate::distance::{cosine_from_parts, dot_f64, l2_squared_f64};

/// Squared distances from one query to every centroid, `[M][K]`
#[derive(Debug, Clone)]
pub struct DistanceTable {
    k: usize,
    values: Vec<f64>,
}

impl DistanceTable {
    #[inline]
    fn get(&self, s: usize, c: u8) -> f64 {
        self.values[s * self.k + c as usize]
    }
}

/// Dot products from one query to every centroid, `[M][K]`, plus the query norm
#[derive(Debug, Clone)]
pub struct DotProductTable {
    k: usize,
    values: Vec<f64>,
    query_norm: f64,
}

impl DotProductTable {
    #[inline]
    fn get(&self, s: usize, c: u8) -> f64 {
        self.values[s * self.k + c as usize]
    }

    pub fn query_norm(&self) -> f64 {
        self.query_norm
    }
}

/// Product quantizer bound to one codebook
///
/// Cloning is cheap: the codebook is shared.
#[derive(Debug, Clone)]
pub struct Quantizer {
    codebook: Arc<Codebook>,
    /// Squared norm of every centroid, `[M][K]`
    centroid_norms: Vec<f64>,
}

impl Quantizer {
    pub fn new(codebook: Arc<Codebook>) -> Self {
        let mut centroid_norms = Vec::with_capacity(codebook.m() * codebook.k());
        for s in 0..codebook.m() {
            for c in 0..codebook.k() {
                let centroid = codebook.centroid(s, c);
                centroid_norms.push(dot_f64(centroid, centroid));
            }
        }
        Self {
            codebook,
            centroid_norms,
        }
    }

    pub fn codebook(&self) -> &Arc<Codebook> {
        &self.codebook
    }

    /// Bytes per code
    #[inline]
    pub fn code_size(&self) -> usize {
        self.codebook.m()
    }

    /// Dimension of the vectors accepted by this quantizer
    #[inline]
    pub fn dims(&self) -> usize {
        self.codebook.dims()
    }

    /// Raw f64 storage divided by code storage
    pub fn compression_ratio(&self) -> f64 {
        let m = self.codebook.m() as f64;
        (m * self.codebook.sub_vector_dim() as f64 * 8.0) / m
    }

    fn check_vector(&self, v: &[f64]) -> Result<(), PqError> {
        if v.len() != self.dims() {
            return Err(PqError::DimensionMismatch {
                expected: self.dims(),
                actual: v.len(),
            });
        }
        Ok(())
    }

    fn check_code(&self, code: &[u8]) -> Result<(), PqError> {
        if code.len() != self.code_size() {
            return Err(PqError::CodeLength {
                expected: self.code_size(),
                actual: code.len(),
            });
        }
        let k = self.codebook.k();
        if let Some((subspace, &c)) = code.iter().enumerate().find(|&(_, &c)| c as usize >= k) {
            return Err(PqError::InvalidCode {
                subspace,
                code: c,
                k,
            });
        }
        Ok(())
    }

    #[inline]
    fn sub<'a>(&self, v: &'a [f64], s: usize) -> &'a [f64] {
        let d = self.codebook.sub_vector_dim();
        &v[s * d..(s + 1) * d]
    }

    /// Encode a vector as the index of the nearest centroid in each subspace
    pub fn encode(&self, vector: &[f64]) -> Result<Vec<u8>, PqError> {
        self.check_vector(vector)?;
        let mut code = Vec::with_capacity(self.code_size());
        for s in 0..self.codebook.m() {
            let sub = self.sub(vector, s);
            let mut best = 0usize;
            let mut best_dist = f64::MAX;
            for c in 0..self.codebook.k() {
                let dist = l2_squared_f64(sub, self.codebook.centroid(s, c));
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            code.push(best as u8);
        }
        Ok(code)
    }

    /// Encode an f32 vector
    pub fn encode_f32(&self, vector: &[f32]) -> Result<Vec<u8>, PqError> {
        self.encode(&to_f64(vector))
    }

    /// Reconstruct the (lossy) vector as the concatenation of the coded centroids
    pub fn decode(&self, code: &[u8]) -> Result<Vec<f64>, PqError> {
        self.check_code(code)?;
        let mut out = Vec::with_capacity(self.dims());
        for (s, &c) in code.iter().enumerate() {
            out.extend_from_slice(self.codebook.centroid(s, c as usize));
        }
        Ok(out)
    }

    /// Euclidean distance between a full-precision query and a code
    pub fn asymmetric_distance(&self, query: &[f64], code: &[u8]) -> Result<f64, PqError> {
        self.check_vector(query)?;
        self.check_code(code)?;
        let sum: f64 = code
            .iter()
            .enumerate()
            .map(|(s, &c)| l2_squared_f64(self.sub(query, s), self.codebook.centroid(s, c as usize)))
            .sum();
        Ok(sum.sqrt())
    }

    /// Euclidean distance between two codes (centroid to centroid)
    pub fn symmetric_distance(&self, a: &[u8], b: &[u8]) -> Result<f64, PqError> {
        self.check_code(a)?;
        self.check_code(b)?;
        let sum: f64 = a
            .iter()
            .zip(b)
            .enumerate()
            .map(|(s, (&ca, &cb))| {
                if ca == cb {
                    0.0
                } else {
                    l2_squared_f64(
                        self.codebook.centroid(s, ca as usize),
                        self.codebook.centroid(s, cb as usize),
                    )
                }
            })
            .sum();
        Ok(sum.sqrt())
    }

    /// Pre-compute squared distances from `query` to every centroid
    pub fn compute_distance_table(&self, query: &[f64]) -> Result<DistanceTable, PqError> {
        self.check_vector(query)?;
        let k = self.codebook.k();
        let mut values = Vec::with_capacity(self.codebook.m() * k);
        for s in 0..self.codebook.m() {
            let sub = self.sub(query, s);
            for c in 0..k {
                values.push(l2_squared_f64(sub, self.codebook.centroid(s, c)));
            }
        }
        Ok(DistanceTable { k, values })
    }

    /// Euclidean distance from the table's query to `code`: M lookups
    pub fn asymmetric_distance_with_table(
        &self,
        table: &DistanceTable,
        code: &[u8],
    ) -> Result<f64, PqError> {
        self.check_code(code)?;
        let sum: f64 = code.iter().enumerate().map(|(s, &c)| table.get(s, c)).sum();
        Ok(sum.sqrt())
    }

    /// Distances from one query to many codes, sharing a single table
    pub fn batch_asymmetric_distance(
        &self,
        query: &[f64],
        codes: &[&[u8]],
    ) -> Result<Vec<f64>, PqError> {
        let table = self.compute_distance_table(query)?;
        codes
            .iter()
            .map(|code| self.asymmetric_distance_with_table(&table, code))
            .collect()
    }

    /// Pre-compute dot products from `query` to every centroid
    pub fn compute_dot_product_table(&self, query: &[f64]) -> Result<DotProductTable, PqError> {
        self.check_vector(query)?;
        let k = self.codebook.k();
        let mut values = Vec::with_capacity(self.codebook.m() * k);
        for s in 0..self.codebook.m() {
            let sub = self.sub(query, s);
            for c in 0..k {
                values.push(dot_f64(sub, self.codebook.centroid(s, c)));
            }
        }
        Ok(DotProductTable {
            k,
            values,
            query_norm: dot_f64(query, query).sqrt(),
        })
    }

    /// Norm of the vector a code decodes to
    fn code_norm(&self, code: &[u8]) -> f64 {
        let k = self.codebook.k();
        code.iter()
            .enumerate()
            .map(|(s, &c)| self.centroid_norms[s * k + c as usize])
            .sum::<f64>()
            .sqrt()
    }

    /// Cosine distance between a full-precision query and a code
    pub fn asymmetric_cosine_distance(&self, query: &[f64], code: &[u8]) -> Result<f64, PqError> {
        self.check_vector(query)?;
        self.check_code(code)?;
        let dot: f64 = code
            .iter()
            .enumerate()
            .map(|(s, &c)| dot_f64(self.sub(query, s), self.codebook.centroid(s, c as usize)))
            .sum();
        Ok(cosine_from_parts(
            dot,
            dot_f64(query, query).sqrt(),
            self.code_norm(code),
        ))
    }

    /// Cosine distance between two codes
    pub fn symmetric_cosine_distance(&self, a: &[u8], b: &[u8]) -> Result<f64, PqError> {
        self.check_code(a)?;
        self.check_code(b)?;
        let dot: f64 = a
            .iter()
            .zip(b)
            .enumerate()
            .map(|(s, (&ca, &cb))| {
                dot_f64(
                    self.codebook.centroid(s, ca as usize),
                    self.codebook.centroid(s, cb as usize),
                )
            })
            .sum();
        Ok(cosine_from_parts(dot, self.code_norm(a), self.code_norm(b)))
    }

    /// Cosine distance from the table's query to `code`
    pub fn asymmetric_cosine_distance_with_table(
        &self,
        table: &DotProductTable,
        code: &[u8],
    ) -> Result<f64, PqError> {
        self.check_code(code)?;
        let dot: f64 = code.iter().enumerate().map(|(s, &c)| table.get(s, c)).sum();
        Ok(cosine_from_parts(dot, table.query_norm, self.code_norm(code)))
    }

    pub fn batch_asymmetric_cosine_distance(
        &self,
        query: &[f64],
        codes: &[&[u8]],
    ) -> Result<Vec<f64>, PqError> {
        let table = self.compute_dot_product_table(query)?;
        codes
            .iter()
            .map(|code| self.asymmetric_cosine_distance_with_table(&table, code))
            .collect()
    }
}

pub(crate) fn to_f64(v: &[f32]) -> Vec<f64> {
    v.iter().map(|&x| x as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_quantizer(m: usize, k: usize, sub: usize, seed: u64) -> Quantizer {
        let mut rng = StdRng::seed_from_u64(seed);
        let centroids = (0..m * k * sub).map(|_| rng.gen::<f64>() - 0.5).collect();
        Quantizer::new(Arc::new(Codebook::new(m, k, sub, centroids).unwrap()))
    }

    fn random_query(dim: usize, rng: &mut StdRng) -> Vec<f64> {
        (0..dim).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect()
    }

    #[test]
    fn test_centroid_encodes_to_itself() {
        let q = random_quantizer(4, 16, 8, 1);
        let code: Vec<u8> = vec![3, 0, 15, 7];
        let decoded = q.decode(&code).unwrap();
        assert_eq!(q.encode(&decoded).unwrap(), code);
    }

    #[test]
    fn test_table_matches_direct_distance() {
        let q = random_quantizer(4, 16, 8, 2);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let query = random_query(32, &mut rng);
            let code: Vec<u8> = (0..4).map(|_| rng.gen_range(0..16)).collect();
            let direct = q.asymmetric_distance(&query, &code).unwrap();
            let table = q.compute_distance_table(&query).unwrap();
            let via_table = q.asymmetric_distance_with_table(&table, &code).unwrap();
            assert!((direct - via_table).abs() < 1e-9);

            let cos_direct = q.asymmetric_cosine_distance(&query, &code).unwrap();
            let dot_table = q.compute_dot_product_table(&query).unwrap();
            let cos_table = q
                .asymmetric_cosine_distance_with_table(&dot_table, &code)
                .unwrap();
            assert!((cos_direct - cos_table).abs() < 1e-9);
        }
    }

    #[test]
    fn test_asymmetric_matches_decoded_euclidean() {
        let q = random_quantizer(4, 16, 8, 4);
        let mut rng = StdRng::seed_from_u64(5);
        let query = random_query(32, &mut rng);
        let code = vec![1u8, 2, 3, 4];
        let decoded = q.decode(&code).unwrap();
        let brute = l2_squared_f64(&query, &decoded).sqrt();
        assert!((q.asymmetric_distance(&query, &code).unwrap() - brute).abs() < 1e-9);
    }

    #[test]
    fn test_symmetric_distances() {
        let q = random_quantizer(2, 8, 4, 6);
        let a = vec![1u8, 5];
        let b = vec![2u8, 7];
        assert_eq!(q.symmetric_distance(&a, &a).unwrap(), 0.0);
        let direct = q.symmetric_distance(&a, &b).unwrap();
        let decoded_a = q.decode(&a).unwrap();
        let decoded_b = q.decode(&b).unwrap();
        assert!((direct - l2_squared_f64(&decoded_a, &decoded_b).sqrt()).abs() < 1e-9);
        assert!(q.symmetric_cosine_distance(&a, &a).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_batch_matches_individual() {
        let q = random_quantizer(4, 16, 2, 7);
        let mut rng = StdRng::seed_from_u64(8);
        let query = random_query(8, &mut rng);
        let codes: Vec<Vec<u8>> = (0..30)
            .map(|_| (0..4).map(|_| rng.gen_range(0..16)).collect())
            .collect();
        let refs: Vec<&[u8]> = codes.iter().map(|c| c.as_slice()).collect();

        let batch = q.batch_asymmetric_distance(&query, &refs).unwrap();
        let batch_cos = q.batch_asymmetric_cosine_distance(&query, &refs).unwrap();
        for (i, code) in codes.iter().enumerate() {
            assert!((batch[i] - q.asymmetric_distance(&query, code).unwrap()).abs() < 1e-9);
            assert!(
                (batch_cos[i] - q.asymmetric_cosine_distance(&query, code).unwrap()).abs() < 1e-9
            );
        }
    }

    #[test]
    fn test_shape_errors_are_reported() {
        let q = random_quantizer(4, 16, 2, 9);
        assert!(matches!(
            q.encode(&[0.0; 7]),
            Err(PqError::DimensionMismatch {
                expected: 8,
                actual: 7
            })
        ));
        assert!(matches!(
            q.decode(&[0, 1, 2]),
            Err(PqError::CodeLength { .. })
        ));
        assert!(matches!(
            q.decode(&[0, 1, 2, 200]),
            Err(PqError::InvalidCode { subspace: 3, .. })
        ));
    }

    #[test]
    fn test_compression_ratio() {
        let q = random_quantizer(4, 16, 8, 10);
        assert_eq!(q.compression_ratio(), 64.0);
    }
}
