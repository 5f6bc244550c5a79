//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default model served through Ollama.
pub const DEFAULT_OLLAMA_EMBED_MODEL: &str = "all-minilm:33m";

/// Default built-in fastembed model.
pub const DEFAULT_FASTEMBED_MODEL: &str = "AllMiniLML6V2";

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedBackend {
    /// HTTP calls to a running Ollama server
    #[default]
    Ollama,
    /// Local ONNX models through fastembed
    FastEmbed,
    /// Token hashing; deterministic and offline, for smoke tests
    Hashed,
}

impl std::fmt::Display for EmbedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedBackend::Ollama => write!(f, "ollama"),
            EmbedBackend::FastEmbed => write!(f, "fastembed"),
            EmbedBackend::Hashed => write!(f, "hashed"),
        }
    }
}

impl std::str::FromStr for EmbedBackend {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(EmbedBackend::Ollama),
            "fastembed" => Ok(EmbedBackend::FastEmbed),
            "hashed" => Ok(EmbedBackend::Hashed),
            other => Err(EmbedError::invalid_config(format!(
                "unknown embedding provider '{other}' (expected ollama, fastembed or hashed)"
            ))),
        }
    }
}

/// Embedding settings, deserialized from the `[embedding]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub provider: EmbedBackend,
    /// Model name; each backend has its own default when unset
    pub model: Option<String>,
    /// Base URL of the Ollama server
    pub base_url: String,
    /// Per-request timeout for HTTP providers
    pub request_timeout_secs: u64,
    /// L2-normalize local model output
    pub normalize: bool,
    /// Vector size for the hashed backend
    pub hashed_dimension: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: EmbedBackend::default(),
            model: None,
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            request_timeout_secs: 120,
            normalize: true,
            hashed_dimension: 384,
        }
    }
}

impl EmbedConfig {
    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            provider: EmbedBackend::Ollama,
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn fastembed(model: impl Into<String>) -> Self {
        Self {
            provider: EmbedBackend::FastEmbed,
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn hashed(dimension: usize) -> Self {
        Self {
            provider: EmbedBackend::Hashed,
            hashed_dimension: dimension,
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_secs = seconds;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// The configured model, or the backend's default.
    pub fn model_name(&self) -> String {
        match (&self.model, self.provider) {
            (Some(model), _) => model.clone(),
            (None, EmbedBackend::Ollama) => DEFAULT_OLLAMA_EMBED_MODEL.to_string(),
            (None, EmbedBackend::FastEmbed) => DEFAULT_FASTEMBED_MODEL.to_string(),
            (None, EmbedBackend::Hashed) => format!("hashed-{}", self.hashed_dimension),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(EmbedError::invalid_config("embedding model name is empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(EmbedError::invalid_config(
                "request_timeout_secs must be greater than zero",
            ));
        }
        match self.provider {
            EmbedBackend::Ollama => {
                if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
                    return Err(EmbedError::invalid_config(format!(
                        "base_url must be an http(s) URL, got '{}'",
                        self.base_url
                    )));
                }
            }
            EmbedBackend::Hashed => {
                if self.hashed_dimension == 0 {
                    return Err(EmbedError::invalid_config(
                        "hashed_dimension must be greater than zero",
                    ));
                }
            }
            EmbedBackend::FastEmbed => {}
        }
        tracing::debug!("Embedding configuration validated: {:?}", self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EmbedConfig::default();
        assert_eq!(config.provider, EmbedBackend::Ollama);
        assert_eq!(config.model_name(), DEFAULT_OLLAMA_EMBED_MODEL);
        assert_eq!(config.base_url, DEFAULT_OLLAMA_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_defaults_differ() {
        let mut config = EmbedConfig::default();
        config.provider = EmbedBackend::FastEmbed;
        assert_eq!(config.model_name(), DEFAULT_FASTEMBED_MODEL);

        assert_eq!(EmbedConfig::hashed(16).model_name(), "hashed-16");
        assert_eq!(EmbedConfig::ollama("nomic-embed-text").model_name(), "nomic-embed-text");
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("FastEmbed".parse::<EmbedBackend>().unwrap(), EmbedBackend::FastEmbed);
        assert_eq!("ollama".parse::<EmbedBackend>().unwrap(), EmbedBackend::Ollama);
        assert!("openai".parse::<EmbedBackend>().is_err());
        assert_eq!(EmbedBackend::Hashed.to_string(), "hashed");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(EmbedConfig::default().with_base_url("localhost:11434").validate().is_err());
        assert!(EmbedConfig::default().with_timeout(0).validate().is_err());
        assert!(EmbedConfig::hashed(0).validate().is_err());
        assert!(EmbedConfig::ollama("  ").validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_table() {
        let config: EmbedConfig =
            serde_json::from_str(r#"{"provider": "hashed", "hashed_dimension": 8}"#).unwrap();
        assert_eq!(config.provider, EmbedBackend::Hashed);
        assert_eq!(config.hashed_dimension, 8);
        assert_eq!(config.base_url, DEFAULT_OLLAMA_URL);
    }
}
