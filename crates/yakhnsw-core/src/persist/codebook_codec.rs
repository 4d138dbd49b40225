//! Standalone codebook format
//!
//! ```text
//! varint M | varint K | varint SubVectorDim | centroid tensor
//! ```
//!
//! The centroid tensor is the nested `[M][K][SubVectorDim]` array, each level
//! prefixed by its varint length, leaves as fixed64 floats. The graph format
//! embeds the same tensor.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::wire::{capacity, WireReader, WireWriter};
use crate::error::{HnswError, Result};
use crate::pq::Codebook;

pub(crate) fn write_centroids<W: Write>(w: &mut WireWriter<W>, codebook: &Codebook) -> Result<()> {
    w.count(codebook.m())?;
    for s in 0..codebook.m() {
        w.count(codebook.k())?;
        for c in 0..codebook.k() {
            let centroid = codebook.centroid(s, c);
            w.count(centroid.len())?;
            for &x in centroid {
                w.f64(x)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn read_centroids<R: Read>(r: &mut WireReader<R>) -> Result<Vec<Vec<Vec<f64>>>> {
    let m = r.count("centroid subspace count")?;
    let mut tensor = Vec::with_capacity(capacity(m));
    for _ in 0..m {
        let k = r.count("centroid count")?;
        let mut subspace = Vec::with_capacity(capacity(k));
        for _ in 0..k {
            let dim = r.count("centroid length")?;
            let mut centroid = Vec::with_capacity(capacity(dim));
            for _ in 0..dim {
                centroid.push(r.f64("centroid value")?);
            }
            subspace.push(centroid);
        }
        tensor.push(subspace);
    }
    Ok(tensor)
}

/// Check a decoded tensor against its declared header
pub(crate) fn codebook_from_tensor(
    m: usize,
    k: usize,
    sub_vector_dim: usize,
    tensor: Vec<Vec<Vec<f64>>>,
) -> Result<Codebook> {
    if tensor.len() != m {
        return Err(HnswError::config(format!(
            "codebook header declares M={m} but the tensor has {} subspaces",
            tensor.len()
        )));
    }
    let codebook = Codebook::from_nested(tensor).map_err(|e| HnswError::config(e.to_string()))?;
    if codebook.k() != k || codebook.sub_vector_dim() != sub_vector_dim {
        return Err(HnswError::config(format!(
            "codebook header declares K={k} SubVectorDim={sub_vector_dim}, tensor has K={} SubVectorDim={}",
            codebook.k(),
            codebook.sub_vector_dim()
        )));
    }
    Ok(codebook)
}

impl Codebook {
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut w = WireWriter::new(writer);
        w.count(self.m())?;
        w.count(self.k())?;
        w.count(self.sub_vector_dim())?;
        write_centroids(&mut w, self)?;
        w.flush()
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut r = WireReader::new(reader);
        let m = r.count("codebook M")?;
        let k = r.count("codebook K")?;
        let sub_vector_dim = r.count("codebook SubVectorDim")?;
        let tensor = read_centroids(&mut r)?;
        codebook_from_tensor(m, k, sub_vector_dim, tensor)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Decode a buffer holding exactly one codebook
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let m = r.count("codebook M")?;
        let k = r.count("codebook K")?;
        let sub_vector_dim = r.count("codebook SubVectorDim")?;
        let tensor = read_centroids(&mut r)?;
        r.finish()?;
        codebook_from_tensor(m, k, sub_vector_dim, tensor)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))?;
        tracing::info!(path = %path.as_ref().display(), m = self.m(), k = self.k(), "saved codebook");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let codebook = Self::read_from(BufReader::new(file))?;
        tracing::info!(path = %path.as_ref().display(), m = codebook.m(), k = codebook.k(), "loaded codebook");
        Ok(codebook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pq::{train, TrainingConfig};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn trained() -> Codebook {
        let mut rng = StdRng::seed_from_u64(5);
        let data: Vec<Vec<f64>> = (0..64)
            .map(|_| (0..8).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect())
            .collect();
        train(
            data,
            &TrainingConfig {
                m: 4,
                k: 8,
                seed: Some(5),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_codebook_bytes_round_trip() {
        let codebook = trained();
        let bytes = codebook.to_bytes().unwrap();
        assert_eq!(&bytes[..3], &[4, 8, 2]);
        assert_eq!(Codebook::from_bytes(&bytes).unwrap(), codebook);
    }

    #[test]
    fn test_codebook_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codebook.bin");
        let codebook = trained();
        codebook.save(&path).unwrap();
        assert_eq!(Codebook::load(&path).unwrap(), codebook);
    }

    #[test]
    fn test_header_mismatch_rejected() {
        let codebook = trained();
        let mut bytes = codebook.to_bytes().unwrap();
        bytes[1] = 9;
        assert!(matches!(
            Codebook::from_bytes(&bytes),
            Err(HnswError::Configuration(_))
        ));
    }

    #[test]
    fn test_truncated_codebook_rejected() {
        let bytes = trained().to_bytes().unwrap();
        assert!(matches!(
            Codebook::from_bytes(&bytes[..bytes.len() - 3]),
            Err(HnswError::Protocol(_))
        ));
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(matches!(Codebook::from_bytes(&extra), Err(HnswError::Protocol(_))));
    }
}
