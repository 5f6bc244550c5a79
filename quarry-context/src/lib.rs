//! Language-aware chunking of source files.
//!
//! [`Chunker`] turns a scanned corpus into [`Chunk`]s carrying file
//! provenance. Splitting rules come from a [`LanguageTable`] that maps file
//! extensions to language tags and language tags to ordered delimiter
//! patterns, with a generic paragraph/line/word strategy for everything else.

pub mod chunker;
pub mod error;
pub mod language;
pub mod text;

pub use chunker::{Chunk, ChunkFallback, ChunkMetadata, ChunkOutcome, Chunker, CorpusRecords};
pub use error::ChunkError;
pub use language::{LanguageTable, TEXT_LANGUAGE};
pub use text::{TextChunk, TextSplitter};
