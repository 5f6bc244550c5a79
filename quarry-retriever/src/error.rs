//! Error types for scanning, index construction and querying.
//!
//! Only [`BuildError`] and [`QueryError`] abort an operation. [`ScanError`],
//! [`BatchError`] and save-side [`PersistenceError`]s are collected into
//! reports and the pipeline keeps going.

use quarry_embed::EmbedError;
use std::path::PathBuf;

/// A single file that could not be read during a scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("skipped {path}: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("walk error: {message}")]
    Walk { message: String },
}

/// Failure to load or save a persisted index.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt index: {message}")]
    Corrupt { message: String },

    #[error("unsupported index format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

/// One embedding batch that was skipped during a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[error("batch {index} (chunks {first_chunk}..{end_chunk}) failed: {message}")]
pub struct BatchError {
    /// Position of the batch in formation order
    pub index: usize,
    pub first_chunk: usize,
    pub end_chunk: usize,
    pub message: String,
}

/// Unrecoverable failure of an index build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("cannot scan {root}: {source}")]
    Scan {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("embedding provider is unavailable: {0}")]
    CollaboratorUnavailable(#[source] EmbedError),

    #[error("build cancelled after {batches_done} of {batches_total} batches")]
    Cancelled {
        batches_done: usize,
        batches_total: usize,
    },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure of the generation collaborator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation service at {endpoint} is unavailable: {source}")]
    Unavailable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("generation request failed: {message}")]
    Request { message: String },

    #[error("invalid generation response: {message}")]
    InvalidResponse { message: String },

    #[error("model {model} is not available (installed: {available})")]
    ModelMissing { model: String, available: String },
}

/// The pipeline stage a query failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Scan,
    Build,
    Search,
    Generation,
}

impl std::fmt::Display for QueryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryStage::Scan => write!(f, "scan"),
            QueryStage::Build => write!(f, "build"),
            QueryStage::Search => write!(f, "search"),
            QueryStage::Generation => write!(f, "generation"),
        }
    }
}

/// User-visible query failure, naming the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{} stage failed: {source}", stage_of(.source))]
    Build {
        #[from]
        source: BuildError,
    },

    /// Embedding the query or searching the index failed.
    #[error("search stage failed: {source}")]
    Search {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("search stage failed: no indexed content matched the query")]
    NoContext,

    /// Retrieval succeeded; the retrieved context is kept for the caller.
    #[error("generation stage failed: {source}")]
    Generation {
        #[source]
        source: GenerationError,
        retrieved: Vec<crate::retrieval::orchestrator::RetrievedChunk>,
    },
}

fn stage_of(error: &BuildError) -> QueryStage {
    match error {
        BuildError::Scan { .. } => QueryStage::Scan,
        _ => QueryStage::Build,
    }
}

impl QueryError {
    pub fn search(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Search {
            source: source.into(),
        }
    }

    pub fn stage(&self) -> QueryStage {
        match self {
            QueryError::Build { source } => stage_of(source),
            QueryError::Search { .. } | QueryError::NoContext => QueryStage::Search,
            QueryError::Generation { .. } => QueryStage::Generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_names_stage() {
        let scan = QueryError::from(BuildError::Scan {
            root: PathBuf::from("/nope"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        });
        assert_eq!(scan.stage(), QueryStage::Scan);
        assert!(scan.to_string().starts_with("scan stage failed"));

        let cancelled = QueryError::from(BuildError::Cancelled {
            batches_done: 1,
            batches_total: 3,
        });
        assert_eq!(cancelled.stage(), QueryStage::Build);
        assert!(cancelled.to_string().starts_with("build stage failed"));

        assert_eq!(QueryError::NoContext.stage(), QueryStage::Search);

        let generation = QueryError::Generation {
            source: GenerationError::Request {
                message: "500".to_string(),
            },
            retrieved: Vec::new(),
        };
        assert_eq!(generation.stage(), QueryStage::Generation);
        assert_eq!(QueryStage::Generation.to_string(), "generation");
    }

    #[test]
    fn test_batch_error_display() {
        let err = BatchError {
            index: 2,
            first_chunk: 128,
            end_chunk: 192,
            message: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "batch 2 (chunks 128..192) failed: timeout");
    }
}
