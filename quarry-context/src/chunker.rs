//! Corpus-level chunking with provenance metadata.
//!
//! [`Chunker::chunk`] takes scanned file contents grouped by extension and
//! returns [`Chunk`]s in a deterministic order: extensions in map order, files
//! in map order within each extension, chunks in file order.

use crate::error::ChunkError;
use crate::language::{GENERIC_DELIMITERS, LanguageTable, TEXT_LANGUAGE};
use crate::text::TextSplitter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Scanned corpus contents: extension → (path → content).
pub type CorpusRecords = BTreeMap<String, BTreeMap<String, String>>;

/// Provenance attached to every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// File name without directories
    pub filename: String,
    /// Path relative to the corpus root
    pub path: String,
    /// Lowercase extension without the dot
    pub extension: String,
    /// Resolved language tag, or `"text"`
    pub language: String,
}

/// A bounded span of a file's text: the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Position within the source file
    pub sequence: usize,
    /// Leading characters shared with the previous chunk of the same file
    pub overlap: usize,
}

/// A file that could not use its language's splitter.
#[derive(Debug, Clone)]
pub struct ChunkFallback {
    pub path: String,
    pub language: String,
    /// Rendered [`ChunkError`] that forced the fallback
    pub reason: String,
}

/// Result of chunking a corpus.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub chunks: Vec<Chunk>,
    /// Files chunked with the generic strategy because their language
    /// splitter could not be built
    pub fallbacks: Vec<ChunkFallback>,
}

/// Chunks a corpus using the splitting rules in a [`LanguageTable`].
#[derive(Debug, Clone)]
pub struct Chunker {
    languages: LanguageTable,
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Fails only if the size/overlap pair is unusable.
    pub fn new(languages: LanguageTable, chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        ChunkError::check_geometry(chunk_size, overlap)?;
        Ok(Self {
            languages,
            chunk_size,
            overlap,
        })
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    /// Chunk every file in `records`.
    pub fn chunk(&self, records: &CorpusRecords) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        let generic = self.generic_splitter();

        for (extension, files) in records {
            let language = self.languages.language_for(extension);
            let language_tag = language.unwrap_or(TEXT_LANGUAGE);

            let splitter = match language {
                Some(tag) => {
                    let patterns = self.languages.delimiters_for(tag);
                    TextSplitter::for_language(tag, &patterns, self.chunk_size, self.overlap)
                }
                None => Ok(generic.clone()),
            };

            let (splitter, failure) = match splitter {
                Ok(splitter) => (splitter, None),
                Err(e) => {
                    warn!(
                        "Splitter for .{} ({}) unavailable, using generic strategy: {}",
                        extension, language_tag, e
                    );
                    (generic.clone(), Some(e.to_string()))
                }
            };

            for (path, content) in files {
                if let Some(reason) = &failure {
                    outcome.fallbacks.push(ChunkFallback {
                        path: path.clone(),
                        language: language_tag.to_string(),
                        reason: reason.clone(),
                    });
                }

                let metadata = ChunkMetadata {
                    filename: file_name(path),
                    path: path.clone(),
                    extension: extension.clone(),
                    language: language_tag.to_string(),
                };

                let pieces = splitter.split(path, content);
                debug!("Chunked {} into {} chunks", path, pieces.len());

                outcome.chunks.extend(pieces.into_iter().map(|piece| Chunk {
                    text: piece.chunk_text,
                    metadata: metadata.clone(),
                    sequence: piece.sequence,
                    overlap: piece.overlap,
                }));
            }
        }

        outcome
    }

    fn generic_splitter(&self) -> TextSplitter {
        // Geometry was validated in `new` and the generic patterns are static.
        TextSplitter::for_language(TEXT_LANGUAGE, GENERIC_DELIMITERS, self.chunk_size, self.overlap)
            .unwrap_or_else(|e| unreachable!("generic splitter must build: {e}"))
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
