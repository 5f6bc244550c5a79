//! Chunk-aware index and its on-disk generations.
//!
//! A persisted index is a *generation* directory:
//!
//! ```text
//! .quarry/
//! ├── CURRENT                      name of the active generation
//! └── gen-20250101T120000123-0/
//!     ├── manifest.json            format, model, dimension, count
//!     ├── vectors.bin              FlatIndex data
//!     ├── chunks.json              id → chunk sidecar
//!     └── fingerprint.txt          only for complete builds
//! ```
//!
//! A generation is written in full and synced before `CURRENT` is replaced
//! by an atomic rename, so a reader that resolves `CURRENT` always sees a
//! complete generation. Superseded generations are deleted afterwards on a
//! best-effort basis.

use super::{EntryId, FlatIndex, IndexError, VectorIndex};
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use quarry_context::Chunk;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Version of the on-disk layout.
pub const FORMAT_VERSION: u32 = 1;

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.json";
const FINGERPRINT_FILE: &str = "fingerprint.txt";
const GENERATION_PREFIX: &str = "gen-";

/// Metadata stored next to every persisted generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    /// Version of the tool that wrote the generation
    pub tool_version: String,
    pub provider: String,
    pub model_id: String,
    pub dimension: usize,
    pub count: usize,
    /// False when some batches failed; such a generation has no fingerprint
    pub complete: bool,
    pub created_at: DateTime<Utc>,
}

/// A vector index plus the chunk behind every entry.
///
/// Entry `i` of the index corresponds to `chunks[i]`.
#[derive(Debug, Clone)]
pub struct IndexStore<I = FlatIndex> {
    index: I,
    chunks: Vec<Chunk>,
    fingerprint: Option<String>,
    provider: String,
    model_id: String,
    complete: bool,
}

#[derive(Serialize, Deserialize)]
struct SidecarEntry {
    id: EntryId,
    #[serde(flatten)]
    chunk: Chunk,
}

impl<I: VectorIndex> IndexStore<I> {
    /// An empty store for vectors from `provider`/`model_id`.
    pub fn new(dimension: usize, provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            index: I::create(dimension),
            chunks: Vec::new(),
            fingerprint: None,
            provider: provider.into(),
            model_id: model_id.into(),
            complete: true,
        }
    }

    pub fn insert(&mut self, vector: &[f32], chunk: Chunk) -> Result<EntryId, IndexError> {
        let id = self.index.insert(vector)?;
        debug_assert_eq!(id as usize, self.chunks.len());
        self.chunks.push(chunk);
        Ok(id)
    }

    /// The `k` nearest chunks to `query` with their distances.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(&Chunk, f32)>, IndexError> {
        Ok(self
            .index
            .search(query, k)?
            .into_iter()
            .filter_map(|(id, distance)| self.chunks.get(id as usize).map(|c| (c, distance)))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Record the corpus fingerprint. Only a complete store keeps one, so an
    /// index missing entries is never mistaken for an up-to-date one.
    pub fn seal(&mut self, fingerprint: impl Into<String>, complete: bool) {
        self.complete = complete;
        self.fingerprint = complete.then(|| fingerprint.into());
    }

    /// Whether vectors from this provider can be compared with the stored
    /// ones. An unknown dimension is checked later, at query time.
    pub fn is_compatible(&self, provider: &str, model_id: &str, dimension: Option<usize>) -> bool {
        self.provider == provider
            && self.model_id == model_id
            && dimension.is_none_or(|d| d == self.dimension())
    }

    fn manifest(&self) -> IndexManifest {
        IndexManifest {
            format_version: FORMAT_VERSION,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            provider: self.provider.clone(),
            model_id: self.model_id.clone(),
            dimension: self.dimension(),
            count: self.len(),
            complete: self.complete,
            created_at: Utc::now(),
        }
    }
}

/// The directory holding persisted generations of one corpus index.
#[derive(Debug, Clone)]
pub struct IndexDirectory {
    dir: PathBuf,
}

impl IndexDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of the generation named by `CURRENT`, if any.
    pub fn current_generation(&self) -> Result<Option<PathBuf>, PersistenceError> {
        let pointer = self.dir.join(CURRENT_FILE);
        let name = match std::fs::read_to_string(&pointer) {
            Ok(name) => name,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(pointer, e)),
        };
        let name = name.trim();
        if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) {
            return Err(PersistenceError::corrupt(format!(
                "CURRENT names an invalid generation {name:?}"
            )));
        }
        Ok(Some(self.dir.join(name)))
    }

    /// Fingerprint of the current generation, without loading vectors.
    ///
    /// `None` when there is no index or the last build was incomplete.
    pub fn stored_fingerprint(&self) -> Result<Option<String>, PersistenceError> {
        let Some(generation) = self.current_generation()? else {
            return Ok(None);
        };
        let path = generation.join(FINGERPRINT_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }

    /// Load the current generation, if there is one.
    pub fn load_current(&self) -> Result<Option<IndexStore>, PersistenceError> {
        let Some(generation) = self.current_generation()? else {
            return Ok(None);
        };
        load_generation(&generation).map(Some)
    }

    /// Write `store` as a new generation and make it current.
    ///
    /// Returns the new generation's path.
    pub fn publish(&self, store: &IndexStore) -> Result<PathBuf, PersistenceError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;

        let (name, generation) = self.claim_generation_dir()?;
        if let Err(e) = write_generation(&generation, store) {
            let _ = std::fs::remove_dir_all(&generation);
            return Err(e);
        }

        let mut pointer = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| PersistenceError::io(&self.dir, e))?;
        pointer
            .write_all(name.as_bytes())
            .and_then(|_| pointer.as_file().sync_all())
            .map_err(|e| PersistenceError::io(pointer.path(), e))?;
        let target = self.dir.join(CURRENT_FILE);
        pointer
            .persist(&target)
            .map_err(|e| PersistenceError::io(&target, e.error))?;
        sync_dir(&self.dir);

        info!("Published index generation {} ({} entries)", name, store.len());
        self.prune(&name);
        Ok(generation)
    }

    // create_dir fails on an existing path, so a claimed name is ours alone.
    fn claim_generation_dir(&self) -> Result<(String, PathBuf), PersistenceError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        for n in 0..1000 {
            let name = format!("{GENERATION_PREFIX}{stamp}-{n}");
            let path = self.dir.join(&name);
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok((name, path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PersistenceError::io(path, e)),
            }
        }
        Err(PersistenceError::corrupt(format!(
            "no free generation name under {}",
            self.dir.display()
        )))
    }

    /// Remove every generation other than `keep`.
    fn prune(&self, keep: &str) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {} for cleanup: {}", self.dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(GENERATION_PREFIX) && name != keep {
                match std::fs::remove_dir_all(entry.path()) {
                    Ok(()) => debug!("Removed superseded generation {}", name),
                    Err(e) => warn!("Failed to remove old generation {}: {}", name, e),
                }
            }
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| PersistenceError::json(path, e))?;
    write_synced(path, &bytes)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let mut file = std::fs::File::create(path).map_err(|e| PersistenceError::io(path, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| PersistenceError::io(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, PersistenceError> {
    let bytes = std::fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| PersistenceError::json(path, e))
}

// Directory fsync is not available everywhere; it only narrows the window
// in which a crash could lose the rename.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

fn write_generation(generation: &Path, store: &IndexStore) -> Result<(), PersistenceError> {
    store.index.save(&generation.join(VECTORS_FILE))?;

    let sidecar: Vec<SidecarEntry> = store
        .chunks
        .iter()
        .enumerate()
        .map(|(id, chunk)| SidecarEntry {
            id: id as EntryId,
            chunk: chunk.clone(),
        })
        .collect();
    write_json(&generation.join(CHUNKS_FILE), &sidecar)?;

    if let Some(fingerprint) = &store.fingerprint {
        write_synced(&generation.join(FINGERPRINT_FILE), fingerprint.as_bytes())?;
    }

    // The manifest goes last: a generation without one is never loaded.
    write_json(&generation.join(MANIFEST_FILE), &store.manifest())?;
    sync_dir(generation);
    Ok(())
}

fn load_generation(generation: &Path) -> Result<IndexStore, PersistenceError> {
    debug!("Loading index generation {}", generation.display());

    let manifest: IndexManifest = read_json(&generation.join(MANIFEST_FILE))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: manifest.format_version,
            expected: FORMAT_VERSION,
        });
    }

    let index = FlatIndex::load(&generation.join(VECTORS_FILE))?;
    let sidecar: Vec<SidecarEntry> = read_json(&generation.join(CHUNKS_FILE))?;

    if index.dimension() != manifest.dimension
        || index.len() != manifest.count
        || sidecar.len() != manifest.count
    {
        return Err(PersistenceError::corrupt(format!(
            "manifest says {} x {}, found {} vectors of {} and {} chunks",
            manifest.count,
            manifest.dimension,
            index.len(),
            index.dimension(),
            sidecar.len()
        )));
    }

    let mut chunks = Vec::with_capacity(sidecar.len());
    for (position, entry) in sidecar.into_iter().enumerate() {
        if entry.id != position as EntryId {
            return Err(PersistenceError::corrupt(format!(
                "chunk sidecar entry {position} has id {}",
                entry.id
            )));
        }
        chunks.push(entry.chunk);
    }

    let fingerprint_path = generation.join(FINGERPRINT_FILE);
    let fingerprint = match std::fs::read_to_string(&fingerprint_path) {
        Ok(text) => Some(text.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(PersistenceError::io(fingerprint_path, e)),
    };

    Ok(IndexStore {
        index,
        chunks,
        fingerprint,
        provider: manifest.provider,
        model_id: manifest.model_id,
        complete: manifest.complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_context::ChunkMetadata;
    use tempfile::tempdir;

    fn chunk(path: &str, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                filename: path.rsplit('/').next().unwrap_or(path).to_string(),
                path: path.to_string(),
                extension: "rs".to_string(),
                language: "rust".to_string(),
            },
            sequence: 0,
            overlap: 0,
        }
    }

    fn sample_store() -> IndexStore {
        let mut store = IndexStore::new(2, "hashed", "hashed-2");
        store.insert(&[0.0, 1.0], chunk("src/a.rs", "fn a() {}")).unwrap();
        store.insert(&[1.0, 0.0], chunk("src/b.rs", "fn b() {}")).unwrap();
        store.seal("abc123", true);
        store
    }

    #[test]
    fn test_search_returns_chunks() {
        let store = sample_store();
        let hits = store.search(&[0.9, 0.1], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.metadata.path, "src/b.rs");
    }

    #[test]
    fn test_incomplete_store_has_no_fingerprint() {
        let mut store = sample_store();
        store.seal("abc123", false);
        assert_eq!(store.fingerprint(), None);
        assert!(!store.is_complete());
    }

    #[test]
    fn test_compatibility() {
        let store = sample_store();
        assert!(store.is_compatible("hashed", "hashed-2", Some(2)));
        assert!(store.is_compatible("hashed", "hashed-2", None));
        assert!(!store.is_compatible("hashed", "hashed-2", Some(3)));
        assert!(!store.is_compatible("ollama", "hashed-2", Some(2)));
        assert!(!store.is_compatible("hashed", "other", Some(2)));
    }

    #[test]
    fn test_publish_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let directory = IndexDirectory::new(dir.path().join(".quarry"));
        assert!(directory.load_current().unwrap().is_none());
        assert_eq!(directory.stored_fingerprint().unwrap(), None);

        let store = sample_store();
        directory.publish(&store).unwrap();

        assert_eq!(directory.stored_fingerprint().unwrap().as_deref(), Some("abc123"));
        let loaded = directory.load_current().unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.chunks(), store.chunks());
        assert_eq!(loaded.model_id(), "hashed-2");
        assert_eq!(loaded.fingerprint(), Some("abc123"));
    }

    #[test]
    fn test_publish_replaces_and_prunes_generations() {
        let dir = tempdir().unwrap();
        let directory = IndexDirectory::new(dir.path());

        let first = directory.publish(&sample_store()).unwrap();
        let mut second_store = sample_store();
        second_store.seal("def456", true);
        let second = directory.publish(&second_store).unwrap();

        assert_ne!(first, second);
        assert!(!first.exists());
        assert_eq!(directory.current_generation().unwrap(), Some(second));
        assert_eq!(directory.stored_fingerprint().unwrap().as_deref(), Some("def456"));

        let generations = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(GENERATION_PREFIX))
            .count();
        assert_eq!(generations, 1);
    }

    #[test]
    fn test_corrupt_generation_fails_to_load() {
        let dir = tempdir().unwrap();
        let directory = IndexDirectory::new(dir.path());
        let generation = directory.publish(&sample_store()).unwrap();

        std::fs::write(generation.join(CHUNKS_FILE), "[]").unwrap();
        assert!(matches!(
            directory.load_current(),
            Err(PersistenceError::Corrupt { .. })
        ));

        std::fs::write(generation.join(MANIFEST_FILE), "{not json").unwrap();
        assert!(matches!(
            directory.load_current(),
            Err(PersistenceError::Json { .. })
        ));
    }

    #[test]
    fn test_invalid_current_pointer() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CURRENT_FILE), "../../etc").unwrap();
        let directory = IndexDirectory::new(dir.path());
        assert!(matches!(
            directory.current_generation(),
            Err(PersistenceError::Corrupt { .. })
        ));
    }
}
