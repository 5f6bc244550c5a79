//! Exact nearest-neighbour search by brute force.
//!
//! Vectors live in one contiguous `Vec<f32>`. On disk the file is a 16 byte
//! header (`QVEC`, dimension as little-endian `u32`, count as little-endian
//! `u64`) followed by the raw vector data in native byte order.

use super::{EntryId, IndexError, VectorIndex};
use crate::error::PersistenceError;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 4] = b"QVEC";
const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    fn vector(&self, id: usize) -> &[f32] {
        &self.data[id * self.dimension..(id + 1) * self.dimension]
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

impl VectorIndex for FlatIndex {
    fn create(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    fn insert(&mut self, vector: &[f32]) -> Result<EntryId, IndexError> {
        self.check_dimension(vector)?;
        let id = self.len() as EntryId;
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(EntryId, f32)>, IndexError> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(EntryId, f32)> = (0..self.len())
            .map(|id| (id as EntryId, euclidean(self.vector(id), query)))
            .collect();
        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }

    fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let mut file =
            std::fs::File::create(path).map_err(|e| PersistenceError::io(path, e))?;

        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(MAGIC);
        header[4..8].copy_from_slice(&(self.dimension as u32).to_le_bytes());
        header[8..16].copy_from_slice(&(self.len() as u64).to_le_bytes());

        file.write_all(&header)
            .and_then(|_| file.write_all(bytemuck::cast_slice(&self.data)))
            .and_then(|_| file.sync_all())
            .map_err(|e| PersistenceError::io(path, e))
    }

    fn load(path: &Path) -> Result<Self, PersistenceError> {
        let bytes = std::fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(PersistenceError::corrupt(format!(
                "{} is not a vector file",
                path.display()
            )));
        }

        let mut dim_bytes = [0u8; 4];
        dim_bytes.copy_from_slice(&bytes[4..8]);
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[8..16]);
        let dimension = u32::from_le_bytes(dim_bytes) as usize;
        let count = u64::from_le_bytes(count_bytes) as usize;

        let body = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()));
        if expected != Some(body.len()) {
            return Err(PersistenceError::corrupt(format!(
                "{} holds {} bytes of vectors, header says {} x {}",
                path.display(),
                body.len(),
                count,
                dimension
            )));
        }

        // Copies into an aligned buffer; the byte slice may not be.
        let data: Vec<f32> = bytemuck::pod_collect_to_vec(body);
        Ok(Self { dimension, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ranking_by_distance() {
        let mut index = FlatIndex::create(2);
        index.insert(&[0.9, 0.0]).unwrap();
        index.insert(&[0.1, 0.0]).unwrap();
        index.insert(&[0.5, 0.0]).unwrap();

        let results = index.search(&[0.0, 0.0], 2).unwrap();
        let ids: Vec<EntryId> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!((results[0].1 - 0.1).abs() < 1e-6);
        assert!((results[1].1 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = FlatIndex::create(1);
        for _ in 0..4 {
            index.insert(&[1.0]).unwrap();
        }
        let ids: Vec<EntryId> = index.search(&[0.0], 4).unwrap().into_iter().map(|r| r.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_k_bounds() {
        let mut index = FlatIndex::create(1);
        index.insert(&[1.0]).unwrap();
        index.insert(&[2.0]).unwrap();

        assert!(index.search(&[0.0], 0).unwrap().is_empty());
        assert_eq!(index.search(&[0.0], 10).unwrap().len(), 2);
        assert!(FlatIndex::create(3).search(&[0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_is_enforced() {
        let mut index = FlatIndex::create(3);
        assert_eq!(
            index.insert(&[1.0, 2.0]),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        );
        assert!(index.search(&[1.0], 1).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");

        let mut index = FlatIndex::create(3);
        index.insert(&[0.25, -1.5, 3.0]).unwrap();
        index.insert(&[7.0, 0.0, -0.125]).unwrap();
        index.save(&path).unwrap();

        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");

        let mut index = FlatIndex::create(4);
        index.insert(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        index.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(FlatIndex::load(&path), Err(PersistenceError::Corrupt { .. })));

        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(FlatIndex::load(&path), Err(PersistenceError::Corrupt { .. })));
    }
}
