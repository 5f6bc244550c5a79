//! The generation collaborator: turns a rendered prompt into an answer.
//!
//! [`OllamaCompletionProvider`] calls `POST {base_url}/api/generate` with
//! `stream: false` and returns the `response` field. Before a long question,
//! [`OllamaCompletionProvider::check_model`] asks `/api/tags` whether the
//! model is installed.

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete `prompt`, returning the model's full response text.
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Name of the model answering.
    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

fn classify(endpoint: &str, err: reqwest::Error) -> GenerationError {
    if err.is_connect() || err.is_timeout() {
        GenerationError::Unavailable {
            endpoint: endpoint.to_string(),
            source: err,
        }
    } else if err.is_decode() {
        GenerationError::InvalidResponse {
            message: err.to_string(),
        }
    } else {
        GenerationError::Request {
            message: err.to_string(),
        }
    }
}

/// Whether `wanted` is among the installed `names`; an untagged name
/// matches its `:latest` tag.
fn model_installed(names: &[String], wanted: &str) -> bool {
    names.iter().any(|name| {
        name == wanted || (!wanted.contains(':') && *name == format!("{wanted}:latest"))
    })
}

#[derive(Debug)]
pub struct OllamaCompletionProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaCompletionProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GenerationError::Request {
                message: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Confirm the server is reachable and the model is installed.
    pub async fn check_model(&self) -> Result<(), GenerationError> {
        let endpoint = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| classify(&endpoint, e))?;
        if !response.status().is_success() {
            return Err(GenerationError::Request {
                message: format!("{endpoint} returned {}", response.status()),
            });
        }

        let tags: TagsResponse = response.json().await.map_err(|e| classify(&endpoint, e))?;
        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        if model_installed(&names, &self.model) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            Err(GenerationError::ModelMissing {
                model: self.model.clone(),
                available: if names.is_empty() {
                    "none".to_string()
                } else {
                    names.join(", ")
                },
            })
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaCompletionProvider {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let endpoint = format!("{}/api/generate", self.base_url);
        debug!("Sending {} byte prompt to {} ({})", prompt.len(), endpoint, self.model);

        let response = self
            .client
            .post(&endpoint)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| classify(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Request {
                message: format!("Ollama returned {status}: {}", body.trim()),
            });
        }

        let body: GenerateResponse = response.json().await.map_err(|e| classify(&endpoint, e))?;
        Ok(body.response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
