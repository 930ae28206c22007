//! Exact inner-product index over L2-normalized vectors.
//!
//! Position `i` in the index is the `i`-th vector it was built from, so search
//! results are positions that the caller resolves against the chunk list built
//! in the same order. With every vector normalized, inner product is cosine
//! similarity.
//!
//! File layout (little-endian):
//! `PRAGFLAT` | version u32 | dimension u32 | count u64 | model id (u32 len + utf-8)
//! | sha256 of payload (32 bytes) | payload of `count * dimension` f32.

use crate::artifacts::{read_npy_matrix, write_atomic};
use crate::error::{IndexError, IngestError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::info;

const MAGIC: &[u8; 8] = b"PRAGFLAT";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIpIndex {
    dimension: usize,
    model_id: String,
    data: Vec<f32>,
}

/// Divides `vector` by its Euclidean norm. Returns `false` and leaves the
/// vector untouched when the norm is zero or not finite.
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    true
}

impl FlatIpIndex {
    /// Normalizes every vector and stores it in input order. An empty corpus,
    /// ragged dimensions, or a vector that cannot be normalized is rejected.
    pub fn build(vectors: &[Vec<f32>], model_id: impl Into<String>) -> Result<Self, IndexError> {
        let dimension = vectors.first().map(Vec::len).ok_or(IndexError::EmptyCorpus)?;
        if dimension == 0 {
            return Err(IndexError::ZeroVector { position: 0 });
        }

        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != dimension {
                return Err(IndexError::RaggedDimensions {
                    position,
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            let mut normalized = vector.clone();
            if !l2_normalize(&mut normalized) {
                return Err(IndexError::ZeroVector { position });
            }
            data.extend_from_slice(&normalized);
        }

        Ok(Self {
            dimension,
            model_id: model_id.into(),
            data,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The normalized vector stored at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn ensure_model(&self, configured: &str) -> Result<(), IndexError> {
        if self.model_id != configured {
            return Err(IndexError::ModelMismatch {
                indexed: self.model_id.clone(),
                configured: configured.to_string(),
            });
        }
        Ok(())
    }

    /// Exhaustive search. Results are ordered by non-increasing score, ties by
    /// position, and hold at most `min(k, len)` entries.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut normalized = query.to_vec();
        if !l2_normalize(&mut normalized) {
            return Err(IndexError::ZeroQuery);
        }

        let mut neighbors = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, stored)| Neighbor {
                position,
                score: dot(stored, &normalized),
            })
            .collect::<Vec<_>>();

        neighbors.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.position.cmp(&right.position))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = self
            .data
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<_>>();
        let checksum = Sha256::digest(&payload);
        let model = self.model_id.as_bytes();

        let mut bytes = Vec::with_capacity(64 + model.len() + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(model.len() as u32).to_le_bytes());
        bytes.extend_from_slice(model);
        bytes.extend_from_slice(&checksum);
        bytes.extend_from_slice(&payload);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let mut reader = ByteReader { bytes, offset: 0 };

        if reader.take(MAGIC.len())? != MAGIC {
            return Err("not a flat index file".to_string());
        }
        let version = reader.u32()?;
        if version != FORMAT_VERSION {
            return Err(format!("unsupported index format version {version}"));
        }
        let dimension = reader.u32()? as usize;
        let count = usize::try_from(reader.u64()?).map_err(|_| "count overflows".to_string())?;
        let model_len = reader.u32()? as usize;
        let model_id = std::str::from_utf8(reader.take(model_len)?)
            .map_err(|error| error.to_string())?
            .to_string();
        let checksum = reader.take(32)?.to_vec();
        let payload = reader.rest();

        if dimension == 0 || count == 0 {
            return Err("index holds no vectors".to_string());
        }
        let expected = count
            .checked_mul(dimension)
            .and_then(|cells| cells.checked_mul(4))
            .ok_or_else(|| "index size overflows".to_string())?;
        if payload.len() != expected {
            return Err(format!(
                "payload has {} bytes, header promises {expected}",
                payload.len()
            ));
        }
        if Sha256::digest(payload).as_slice() != checksum.as_slice() {
            return Err("payload checksum mismatch".to_string());
        }

        let data = payload
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();

        Ok(Self {
            dimension,
            model_id,
            data,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        write_atomic(path, &self.to_bytes())
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = fs::read(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes).map_err(|details| IndexError::Corrupt {
            path: path.to_path_buf(),
            details,
        })
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| "truncated index file".to_string())?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, String> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.offset..];
        self.offset = self.bytes.len();
        slice
    }
}

/// Loads raw vectors from an `.npy` file, builds the index and writes it to
/// `output`.
pub fn build_index_file(
    embeddings: &Path,
    output: &Path,
    model_id: &str,
) -> Result<FlatIpIndex, IngestError> {
    let vectors = read_npy_matrix(embeddings)?;
    info!(
        path = %embeddings.display(),
        vectors = vectors.len(),
        dimension = vectors.first().map(Vec::len).unwrap_or(0),
        "loaded embeddings"
    );

    let index = FlatIpIndex::build(&vectors, model_id)?;
    index.save(output)?;
    info!(path = %output.display(), vectors = index.len(), "flat index saved");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::write_npy_matrix;
    use tempfile::tempdir;

    fn sample() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
            vec![3.0, 3.0, 0.0],
            vec![0.0, 0.0, -5.0],
        ]
    }

    #[test]
    fn empty_corpus_is_rejected() {
        assert!(matches!(
            FlatIpIndex::build(&[], "m"),
            Err(IndexError::EmptyCorpus)
        ));
    }

    #[test]
    fn zero_vectors_are_rejected_with_position() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 0.0]];
        assert!(matches!(
            FlatIpIndex::build(&vectors, "m"),
            Err(IndexError::ZeroVector { position: 1 })
        ));
    }

    #[test]
    fn ragged_vectors_are_rejected() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0]];
        assert!(matches!(
            FlatIpIndex::build(&vectors, "m"),
            Err(IndexError::RaggedDimensions { position: 1, .. })
        ));
    }

    #[test]
    fn stored_vectors_keep_insertion_order_and_unit_norm() {
        let index = FlatIpIndex::build(&sample(), "m").unwrap();
        assert_eq!(index.len(), 4);

        for (position, original) in sample().iter().enumerate() {
            let mut expected = original.clone();
            l2_normalize(&mut expected);
            let stored = index.vector(position).unwrap();
            for (left, right) in stored.iter().zip(&expected) {
                assert!((left - right).abs() < 1e-6);
            }
            let norm = stored.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
        assert!(index.vector(4).is_none());
    }

    #[test]
    fn search_orders_by_cosine_similarity() {
        let index = FlatIpIndex::build(&sample(), "m").unwrap();
        let hits = index.search(&[1.0, 0.9, 0.0], 3).unwrap();

        let positions = hits.iter().map(|hit| hit.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![2, 0, 1]);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));

        let again = index.search(&[1.0, 0.9, 0.0], 3).unwrap();
        assert_eq!(hits, again);
    }

    #[test]
    fn oversized_k_returns_every_position_once() {
        let index = FlatIpIndex::build(&sample(), "m").unwrap();
        let hits = index.search(&[0.0, 1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|hit| hit.position < index.len()));
    }

    #[test]
    fn query_dimension_and_zero_queries_are_rejected() {
        let index = FlatIpIndex::build(&sample(), "m").unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            index.search(&[0.0, 0.0, 0.0], 1),
            Err(IndexError::ZeroQuery)
        ));
    }

    #[test]
    fn saved_index_loads_identically() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let npy = dir.path().join("embeddings.npy");
        let out = dir.path().join("faiss_index.index");
        write_npy_matrix(&npy, &sample())?;

        let built = build_index_file(&npy, &out, "remote:test")?;
        let loaded = FlatIpIndex::load(&out)?;

        assert_eq!(built, loaded);
        assert_eq!(loaded.model_id(), "remote:test");
        assert!(loaded.ensure_model("remote:test").is_ok());
        assert!(matches!(
            loaded.ensure_model("local:other"),
            Err(IndexError::ModelMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn tampered_index_is_reported_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("faiss_index.index");
        let mut bytes = FlatIpIndex::build(&sample(), "m")?.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes)?;

        assert!(matches!(
            FlatIpIndex::load(&path),
            Err(IndexError::Corrupt { .. })
        ));
        Ok(())
    }

    #[test]
    fn building_from_an_empty_matrix_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let npy = dir.path().join("embeddings.npy");
        write_npy_matrix(&npy, &[])?;

        let error = build_index_file(&npy, &dir.path().join("x.index"), "m").unwrap_err();
        assert!(matches!(error, IngestError::Index(IndexError::EmptyCorpus)));
        assert!(!dir.path().join("x.index").exists());
        Ok(())
    }
}
