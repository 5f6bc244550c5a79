//! Error types for the embedding system

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// [`EmbedError::Unavailable`] is kept apart from the other variants: it means
/// the collaborator could not be reached at all, which callers treat as fatal
/// for a whole build, while the remaining variants describe a single failed
/// request that can be skipped.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The embedding service could not be reached
    #[error("Embedding service at {endpoint} is unavailable: {source}")]
    Unavailable {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The service answered with something that is not a usable embedding
    #[error("Invalid embedding response: {message}")]
    InvalidResponse { message: String },

    /// Fewer or more vectors than inputs, or vectors of the wrong size
    #[error("Embedding {what} mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Wrap an error raised while loading a model.
    pub fn model_init<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::ModelInitialization {
            source: source.into(),
        }
    }

    /// Wrap an error raised while generating embeddings.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::EmbeddingGeneration {
            source: source.into(),
        }
    }

    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Whether the failure means the collaborator is unreachable rather than
    /// a single request having failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_distinguished() {
        let down = EmbedError::Unavailable {
            endpoint: "http://localhost:11434".to_string(),
            source: "connection refused".into(),
        };
        assert!(down.is_unavailable());
        assert!(down.to_string().contains("localhost:11434"));

        let bad = EmbedError::invalid_response("missing field `embeddings`");
        assert!(!bad.is_unavailable());
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = EmbedError::ShapeMismatch {
            what: "vector count",
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Embedding vector count mismatch: expected 4, got 3");
    }
}
