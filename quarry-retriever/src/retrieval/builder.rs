//! Batched, partial-failure-tolerant index construction.
//!
//! [`IndexBuilder::build`] scans the corpus, fingerprints it, and either
//! reuses the persisted index or rebuilds one. A rebuild embeds chunks in
//! fixed-size batches; a batch that fails is recorded and skipped while the
//! rest of the corpus is still indexed. Losing the embedding service itself
//! (a batch still unavailable after one retry) fails the build instead.
//!
//! ## Pipeline Flow
//!
//! ```text
//! CorpusScanner → fingerprint ─┬─ matches + compatible → IndexDirectory::load_current
//!                              └─ otherwise → Chunker → batches → EmbeddingProvider
//!                                                                  ↓ (buffered, in order)
//!                                                 IndexStore::insert → IndexDirectory::publish
//! ```
//!
//! A store built with failed batches is persisted without a fingerprint, so
//! it serves queries but is rebuilt on the next run.

use super::build_phase::BuildPhase;
use super::fingerprint::fingerprint;
use super::scanner::{CorpusScanner, CorpusSnapshot};
use crate::config::QuarryConfig;
use crate::error::{BatchError, BuildError};
use crate::storage::{IndexDirectory, IndexStore};
use futures::{StreamExt, stream};
use quarry_context::{Chunk, Chunker};
use quarry_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What happened to the store on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    NotAttempted,
    /// The persisted store was current and was loaded as-is
    Reused,
    Saved { generation: String },
    /// The in-memory store is still usable
    Failed { message: String },
}

/// Summary of one build, suitable for printing or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Last phase reached
    pub phase: BuildPhase,
    /// Whether embeddings were computed
    pub built: bool,
    pub fingerprint: Option<String>,
    /// Why the persisted store could not be reused, for rebuilds
    pub rebuild_reason: Option<String>,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub skipped: Vec<String>,
    pub chunks: usize,
    pub chunker_fallbacks: usize,
    pub batches_total: usize,
    pub failed_batches: Vec<BatchError>,
    pub entries: usize,
    pub persistence: PersistenceOutcome,
    pub elapsed_ms: u64,
}

impl Default for BuildReport {
    fn default() -> Self {
        Self {
            phase: BuildPhase::Start,
            built: false,
            fingerprint: None,
            rebuild_reason: None,
            files_scanned: 0,
            files_skipped: 0,
            skipped: Vec::new(),
            chunks: 0,
            chunker_fallbacks: 0,
            batches_total: 0,
            failed_batches: Vec::new(),
            entries: 0,
            persistence: PersistenceOutcome::NotAttempted,
            elapsed_ms: 0,
        }
    }
}

impl BuildReport {
    /// True when the build finished but lost batches or failed to persist.
    pub fn is_degraded(&self) -> bool {
        !self.failed_batches.is_empty() || matches!(self.persistence, PersistenceOutcome::Failed { .. })
    }

    fn record_scan(&mut self, snapshot: &CorpusSnapshot) {
        let report = snapshot.report();
        self.files_scanned = report.files_read;
        self.files_skipped = report.skipped.len();
        self.skipped = report.skipped.iter().map(|e| e.to_string()).collect();
    }
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Index build: {}", self.phase)?;
        writeln!(
            f,
            "  Mode: {}",
            if self.built { "rebuilt" } else { "reused existing index" }
        )?;
        if let Some(reason) = &self.rebuild_reason {
            writeln!(f, "  Rebuild reason: {reason}")?;
        }
        writeln!(
            f,
            "  Files: {} scanned, {} skipped",
            self.files_scanned, self.files_skipped
        )?;
        for skipped in &self.skipped {
            writeln!(f, "    - {skipped}")?;
        }
        if self.built {
            writeln!(
                f,
                "  Chunks: {} ({} files used the generic splitter)",
                self.chunks, self.chunker_fallbacks
            )?;
            writeln!(
                f,
                "  Batches: {} total, {} failed",
                self.batches_total,
                self.failed_batches.len()
            )?;
            for failed in &self.failed_batches {
                writeln!(f, "    - {failed}")?;
            }
        }
        writeln!(f, "  Entries: {}", self.entries)?;
        match &self.persistence {
            PersistenceOutcome::NotAttempted => writeln!(f, "  Persistence: not attempted")?,
            PersistenceOutcome::Reused => writeln!(f, "  Persistence: unchanged")?,
            PersistenceOutcome::Saved { generation } => {
                writeln!(f, "  Persistence: saved {generation}")?
            }
            PersistenceOutcome::Failed { message } => {
                writeln!(f, "  Persistence: FAILED ({message})")?
            }
        }
        if let Some(fp) = &self.fingerprint {
            writeln!(f, "  Fingerprint: {fp}")?;
        }
        write!(f, "  Elapsed: {} ms", self.elapsed_ms)
    }
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildOutcome {
    pub store: IndexStore,
    /// False when the persisted store was reused
    pub built: bool,
    pub report: BuildReport,
}

/// Builds or reuses the index for one corpus root.
pub struct IndexBuilder {
    scanner: CorpusScanner,
    chunker: Chunker,
    directory: IndexDirectory,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    concurrency: usize,
    cancel: Arc<AtomicBool>,
}

impl IndexBuilder {
    pub fn new(
        root: impl Into<PathBuf>,
        config: &QuarryConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, BuildError> {
        let root = root.into();
        config
            .validate()
            .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;

        let chunker = Chunker::new(
            config.chunking.language_table(),
            config.chunking.chunk_size,
            config.chunking.overlap,
        )
        .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;

        let index_dir = config.index_dir(&root);
        Ok(Self {
            scanner: CorpusScanner::new(&root, config.scan_options(Some(index_dir.clone()))),
            chunker,
            directory: IndexDirectory::new(index_dir),
            provider,
            batch_size: config.index.batch_size,
            concurrency: config.index.embed_concurrency,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn root(&self) -> &Path {
        self.scanner.root()
    }

    pub fn directory(&self) -> &IndexDirectory {
        &self.directory
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Setting the flag stops a running rebuild at the next batch boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Produce a store for the current corpus.
    ///
    /// With `force` the persisted store is ignored and everything is
    /// re-embedded.
    pub async fn build(&self, force: bool) -> Result<BuildOutcome, BuildError> {
        let started = Instant::now();
        let mut report = BuildReport::default();

        let result = self.run(force, &mut report).await;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(store) => {
                transition(&mut report, BuildPhase::Done);
                info!(
                    "Index ready: {} entries ({}) in {} ms",
                    store.len(),
                    if report.built { "rebuilt" } else { "reused" },
                    report.elapsed_ms
                );
                Ok(BuildOutcome {
                    store,
                    built: report.built,
                    report,
                })
            }
            Err(e) => {
                error!("Index build failed during {}: {}", report.phase, e);
                transition(&mut report, BuildPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run(&self, force: bool, report: &mut BuildReport) -> Result<IndexStore, BuildError> {
        transition(report, BuildPhase::Scanning);
        let scanner = self.scanner.clone();
        let snapshot = tokio::task::spawn_blocking(move || scanner.scan()).await??;
        report.record_scan(&snapshot);

        transition(report, BuildPhase::Fingerprinting);
        let fresh = fingerprint(snapshot.digests());
        debug!("Corpus fingerprint {}", fresh);
        report.fingerprint = Some(fresh.clone());

        let reason = if force {
            "forced".to_string()
        } else {
            match self.try_reuse(&fresh).await {
                Ok(store) => {
                    transition(report, BuildPhase::ReuseExisting);
                    report.entries = store.len();
                    report.persistence = PersistenceOutcome::Reused;
                    return Ok(store);
                }
                Err(reason) => reason,
            }
        };
        info!("Rebuilding index: {}", reason);
        report.rebuild_reason = Some(reason);

        transition(report, BuildPhase::Rebuilding);
        let store = self.rebuild(&snapshot, &fresh, report).await?;
        report.built = true;
        report.entries = store.len();

        transition(report, BuildPhase::Persisting);
        let (store, published) = self.persist(store).await?;
        report.persistence = match published {
            Ok(generation) => PersistenceOutcome::Saved { generation },
            Err(message) => PersistenceOutcome::Failed { message },
        };
        Ok(store)
    }

    /// The persisted store, if it matches `fresh` and the active provider.
    /// Otherwise the reason it cannot be used.
    ///
    /// The fingerprint file is only a cheap early check; the loaded store is
    /// checked again, since another writer may have replaced CURRENT between
    /// the two reads.
    async fn try_reuse(&self, fresh: &str) -> Result<IndexStore, String> {
        let directory = self.directory.clone();
        let stored = directory.stored_fingerprint().map_err(|e| {
            warn!("Cannot read persisted index: {}", e);
            format!("persisted index unreadable: {e}")
        })?;
        match stored.as_deref() {
            None => return Err("no complete persisted index".to_string()),
            Some(stored) if stored != fresh => return Err("corpus changed".to_string()),
            Some(_) => {}
        }

        let loaded = tokio::task::spawn_blocking(move || directory.load_current())
            .await
            .map_err(|e| format!("loading persisted index failed: {e}"))?;
        let store = match loaded {
            Ok(Some(store)) => store,
            Ok(None) => return Err("no complete persisted index".to_string()),
            Err(e) => {
                warn!("Persisted index is unusable, rebuilding: {}", e);
                return Err(format!("persisted index unusable: {e}"));
            }
        };

        check_reusable(&store, fresh, self.provider.as_ref())?;
        Ok(store)
    }

    async fn rebuild(
        &self,
        snapshot: &CorpusSnapshot,
        fresh: &str,
        report: &mut BuildReport,
    ) -> Result<IndexStore, BuildError> {
        let dimension = self
            .provider
            .probe_dimension()
            .await
            .map_err(BuildError::CollaboratorUnavailable)?;
        info!(
            "Embedding with {}/{} (dimension {})",
            self.provider.provider_name(),
            self.provider.model_id(),
            dimension
        );

        let outcome = self.chunker.chunk(snapshot.records());
        let chunks = outcome.chunks;
        report.chunks = chunks.len();
        report.chunker_fallbacks = outcome.fallbacks.len();

        let batches: Vec<&[Chunk]> = chunks.chunks(self.batch_size).collect();
        let batches_total = batches.len();
        report.batches_total = batches_total;
        info!(
            "Embedding {} chunks in {} batches of up to {}",
            chunks.len(),
            batches_total,
            self.batch_size
        );

        let mut store = IndexStore::new(
            dimension,
            self.provider.provider_name(),
            self.provider.model_id(),
        );

        let provider = self.provider.as_ref();
        let mut embedded = stream::iter(batches.iter().copied().enumerate())
            .map(|(index, batch)| async move {
                let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
                let result = match provider.embed_texts(&texts).await {
                    Err(e) if e.is_unavailable() => {
                        warn!("Embedding service lost on batch {}, retrying once: {}", index, e);
                        provider.embed_texts(&texts).await
                    }
                    other => other,
                };
                (index, result)
            })
            .buffered(self.concurrency);

        let mut batches_done = 0;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Build cancelled after {} of {} batches", batches_done, batches_total);
                return Err(BuildError::Cancelled {
                    batches_done,
                    batches_total,
                });
            }
            let Some((index, result)) = embedded.next().await else {
                break;
            };

            // An unreachable service fails the whole build; nothing is published.
            let result = match result {
                Err(e) if e.is_unavailable() => {
                    error!(
                        "Embedding service unavailable at batch {} of {}: {}",
                        index, batches_total, e
                    );
                    return Err(BuildError::CollaboratorUnavailable(e));
                }
                other => other,
            };

            let batch = batches[index];
            let first_chunk = index * self.batch_size;
            let end_chunk = first_chunk + batch.len();

            let inserted = validate_batch(result, batch.len(), dimension)
                .map_err(|e| e.to_string())
                .and_then(|vectors| {
                    vectors
                        .embeddings
                        .iter()
                        .zip(batch)
                        .try_for_each(|(vector, chunk)| {
                            store.insert(vector, chunk.clone()).map(|_| ())
                        })
                        .map_err(|e| e.to_string())
                });

            match inserted {
                Ok(()) => {
                    debug!(
                        "Batch {} (chunks {}..{}) inserted",
                        index, first_chunk, end_chunk
                    );
                }
                Err(message) => {
                    let failure = BatchError {
                        index,
                        first_chunk,
                        end_chunk,
                        message,
                    };
                    error!("{}", failure);
                    report.failed_batches.push(failure);
                }
            }
            batches_done += 1;
        }

        let complete = report.failed_batches.is_empty();
        if !complete {
            warn!(
                "{} of {} batches failed; index is incomplete and will be rebuilt next run",
                report.failed_batches.len(),
                batches_total
            );
        }
        store.seal(fresh, complete);
        Ok(store)
    }

    /// Publish `store`. A failed save is returned as a message, not an error:
    /// the in-memory store is still served.
    async fn persist(
        &self,
        store: IndexStore,
    ) -> Result<(IndexStore, Result<String, String>), BuildError> {
        let directory = self.directory.clone();
        let (store, published) = tokio::task::spawn_blocking(move || {
            let published = directory.publish(&store);
            (store, published)
        })
        .await?;

        let published = match published {
            Ok(generation) => Ok(generation
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()),
            Err(e) => {
                error!("Failed to persist index: {}", e);
                Err(e.to_string())
            }
        };
        Ok((store, published))
    }
}

/// Whether a loaded store can stand in for a rebuild of the corpus `fresh`.
fn check_reusable(
    store: &IndexStore,
    fresh: &str,
    provider: &dyn EmbeddingProvider,
) -> Result<(), String> {
    match store.fingerprint() {
        None => return Err("no complete persisted index".to_string()),
        Some(stored) if stored != fresh => {
            warn!("Persisted index changed while it was being loaded");
            return Err("corpus changed".to_string());
        }
        Some(_) => {}
    }
    if !store.is_compatible(
        provider.provider_name(),
        provider.model_id(),
        provider.embedding_dimension(),
    ) {
        warn!(
            "Persisted index was built with {}/{} (dimension {}), active provider is {}/{}",
            store.provider(),
            store.model_id(),
            store.dimension(),
            provider.provider_name(),
            provider.model_id()
        );
        return Err("embedding provider changed".to_string());
    }
    Ok(())
}

fn transition(report: &mut BuildReport, next: BuildPhase) {
    info!("Build phase {} -> {}", report.phase, next);
    report.phase = next;
}

/// One vector per chunk, each of the store's dimension.
fn validate_batch(
    result: Result<EmbeddingResult, EmbedError>,
    expected_count: usize,
    dimension: usize,
) -> Result<EmbeddingResult, EmbedError> {
    let result = result?;
    result.check_shape(expected_count)?;
    if !result.is_empty() && result.dimension != dimension {
        return Err(EmbedError::ShapeMismatch {
            what: "dimension",
            expected: dimension,
            actual: result.dimension,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_embed::HashedEmbedProvider;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn test_phase_transitions_are_logged() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn answer() -> u32 { 42 }").unwrap();

        let builder = IndexBuilder::new(
            dir.path(),
            &QuarryConfig::default(),
            Arc::new(HashedEmbedProvider::new(8)),
        )
        .unwrap();

        let first = builder.build(false).await.unwrap();
        assert_eq!(first.report.phase, BuildPhase::Done);
        assert!(logs_contain("Build phase start -> scanning"));
        assert!(logs_contain("Build phase fingerprinting -> rebuilding"));
        assert!(logs_contain("Build phase rebuilding -> persisting"));

        let second = builder.build(false).await.unwrap();
        assert!(!second.built);
        assert!(logs_contain("Build phase fingerprinting -> reuse-existing"));
        assert!(logs_contain("Build phase reuse-existing -> done"));
    }

    #[test]
    fn test_loaded_store_is_checked_again() {
        let provider = HashedEmbedProvider::new(8);
        let store = |fingerprint: &str, complete: bool| {
            let mut store: IndexStore =
                IndexStore::new(8, provider.provider_name(), provider.model_id());
            store.seal(fingerprint, complete);
            store
        };

        assert_eq!(check_reusable(&store("abc", true), "abc", &provider), Ok(()));
        assert_eq!(
            check_reusable(&store("abc", false), "abc", &provider),
            Err("no complete persisted index".to_string())
        );
        assert_eq!(
            check_reusable(&store("def", true), "abc", &provider),
            Err("corpus changed".to_string())
        );

        let mut other: IndexStore = IndexStore::new(8, "ollama", "nomic-embed-text");
        other.seal("abc", true);
        assert_eq!(
            check_reusable(&other, "abc", &provider),
            Err("embedding provider changed".to_string())
        );
    }

    #[test]
    fn test_validate_batch() {
        let ok = EmbeddingResult::new(vec![vec![0.0; 3], vec![1.0; 3]]);
        assert!(validate_batch(Ok(ok.clone()), 2, 3).is_ok());
        assert!(validate_batch(Ok(ok.clone()), 3, 3).is_err());
        assert!(validate_batch(Ok(ok), 2, 4).is_err());
        assert!(validate_batch(Err(EmbedError::invalid_response("boom")), 2, 3).is_err());
    }

    #[test]
    fn test_report_degraded() {
        let mut report = BuildReport::default();
        assert!(!report.is_degraded());

        report.persistence = PersistenceOutcome::Failed {
            message: "disk full".to_string(),
        };
        assert!(report.is_degraded());

        report.persistence = PersistenceOutcome::Saved {
            generation: "gen-1".to_string(),
        };
        report.failed_batches.push(BatchError {
            index: 0,
            first_chunk: 0,
            end_chunk: 4,
            message: "timeout".to_string(),
        });
        assert!(report.is_degraded());
    }

    #[test]
    fn test_report_display_and_json() {
        let report = BuildReport {
            phase: BuildPhase::Done,
            built: true,
            files_scanned: 2,
            chunks: 3,
            batches_total: 1,
            entries: 3,
            persistence: PersistenceOutcome::Saved {
                generation: "gen-20250101T000000000-0".to_string(),
            },
            ..BuildReport::default()
        };

        let text = report.to_string();
        assert!(text.contains("Index build: done"));
        assert!(text.contains("Chunks: 3"));
        assert!(text.contains("saved gen-20250101T000000000-0"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["phase"], "done");
        assert_eq!(json["persistence"]["status"], "saved");
        assert_eq!(json["entries"], 3);
    }
}
