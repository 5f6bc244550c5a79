//! Vector storage for embedded chunks.
//!
//! - **[`VectorIndex`]**: nearest-neighbour search over fixed-size vectors
//! - **[`FlatIndex`]**: exact brute-force implementation of `VectorIndex`
//! - **[`IndexStore`]**: a vector index paired with the chunk for every entry
//! - **[`IndexDirectory`]**: on-disk generations with atomic publication
//!
//! ## Architecture
//!
//! ```text
//! VectorIndex ── FlatIndex ─┐
//!                           ├─ IndexStore ── IndexDirectory (CURRENT + gen-*/)
//! Chunk sidecar ────────────┘
//! ```

use crate::error::PersistenceError;
use std::path::Path;

pub mod flat_index;
pub mod index_store;

pub use flat_index::FlatIndex;
pub use index_store::{IndexDirectory, IndexManifest, IndexStore};

/// Identifier assigned by an index on insert: dense and insertion-ordered.
pub type EntryId = u64;

/// Errors from in-memory index operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("vector has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Nearest-neighbour search over vectors of one fixed dimension.
pub trait VectorIndex: Send + Sync {
    /// An empty index for vectors of size `dimension`.
    fn create(dimension: usize) -> Self
    where
        Self: Sized;

    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a vector and return its id.
    fn insert(&mut self, vector: &[f32]) -> Result<EntryId, IndexError>;

    /// The `k` entries closest to `query`, nearest first, as
    /// `(id, euclidean distance)` pairs. Equal distances keep insertion order.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(EntryId, f32)>, IndexError>;

    fn save(&self, path: &Path) -> Result<(), PersistenceError>;

    fn load(path: &Path) -> Result<Self, PersistenceError>
    where
        Self: Sized;
}
