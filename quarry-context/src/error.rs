//! Error types for chunking

/// Errors raised while preparing a splitter.
///
/// None of these abort a corpus-wide chunking pass: a bad delimiter set for
/// one language downgrades the affected files to the generic strategy, see
/// [`Chunker::chunk`](crate::chunker::Chunker::chunk).
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// A configured delimiter pattern is not a valid regular expression
    #[error("invalid delimiter pattern {pattern:?} for language {language}: {source}")]
    InvalidDelimiter {
        language: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Chunk size and overlap cannot produce bounded chunks
    #[error("invalid chunk geometry: chunk_size={chunk_size}, overlap={overlap}")]
    InvalidGeometry { chunk_size: usize, overlap: usize },
}

impl ChunkError {
    /// Validate a `chunk_size`/`overlap` pair.
    ///
    /// The overlap must leave room for at least one new character per chunk,
    /// so `overlap < chunk_size` is required.
    pub fn check_geometry(chunk_size: usize, overlap: usize) -> Result<(), ChunkError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(ChunkError::InvalidGeometry {
                chunk_size,
                overlap,
            });
        }
        Ok(())
    }
}
