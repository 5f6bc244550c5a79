//! Embeddings from a running Ollama server.
//!
//! Uses the batch endpoint `POST {base_url}/api/embed` with
//! `{"model": .., "input": [..]}`, which answers `{"embeddings": [[..], ..]}`
//! in input order. The vector size is learned from the first successful
//! response and checked on every response after that.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Map a transport failure to the right [`EmbedError`] variant.
///
/// Connection and timeout failures mean the server is unavailable; anything
/// else is a failed request.
fn classify_request_error(endpoint: &str, err: reqwest::Error) -> EmbedError {
    if err.is_connect() || err.is_timeout() {
        EmbedError::Unavailable {
            endpoint: endpoint.to_string(),
            source: Box::new(err),
        }
    } else if err.is_decode() {
        EmbedError::invalid_response(err.to_string())
    } else {
        EmbedError::embedding_gen(err)
    }
}

#[derive(Debug)]
pub struct OllamaEmbedProvider {
    client: Client,
    base_url: String,
    model: String,
    dimension: OnceLock<usize>,
}

impl OllamaEmbedProvider {
    pub fn new(config: &EmbedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(EmbedError::model_init)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model_name(),
            dimension: OnceLock::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let endpoint = self.endpoint();
        tracing::debug!("Requesting {} embeddings from {}", texts.len(), endpoint);

        let response = self
            .client
            .post(&endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| classify_request_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::embedding_gen(format!(
                "Ollama returned {status}: {}",
                body.trim()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| classify_request_error(&endpoint, e))?;

        let result = EmbeddingResult::new(body.embeddings);
        result.check_shape(texts.len())?;
        if result.dimension == 0 {
            return Err(EmbedError::invalid_response("Ollama returned empty vectors"));
        }

        let known = *self.dimension.get_or_init(|| result.dimension);
        if known != result.dimension {
            return Err(EmbedError::ShapeMismatch {
                what: "dimension",
                expected: known,
                actual: result.dimension,
            });
        }

        Ok(result)
    }

    fn embedding_dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
