//! # quarry-embed
//!
//! Text embedding providers behind one async trait, [`EmbeddingProvider`].
//!
//! - [`OllamaEmbedProvider`]: HTTP calls to a local or remote Ollama server
//! - [`FastEmbedProvider`]: local ONNX models via fastembed, cached per process
//! - [`HashedEmbedProvider`]: hashed token counts, for offline smoke tests
//!
//! ```no_run
//! use quarry_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = create_provider(&EmbedConfig::ollama("all-minilm:33m")).await?;
//!
//! let texts = vec!["fn main() {}".to_string(), "def main(): pass".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("{} embeddings of dimension {}", result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! Connection failures surface as [`EmbedError::Unavailable`], so callers can
//! tell "the service is down" apart from "this request failed".

pub mod config;
pub mod error;
pub mod ollama;
pub mod provider;

pub use config::{EmbedBackend, EmbedConfig};
pub use error::{EmbedError, Result};
pub use ollama::OllamaEmbedProvider;
pub use provider::{
    EmbeddingProvider, EmbeddingResult, FastEmbedProvider, HashedEmbedProvider, create_provider,
};
