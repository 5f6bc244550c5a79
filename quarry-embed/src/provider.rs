//! Embedding provider implementations

use crate::config::{EmbedBackend, EmbedConfig};
use crate::error::{EmbedError, Result};
use crate::ollama::OllamaEmbedProvider;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Text embedded when a provider's dimension has to be discovered.
pub const DIMENSION_PROBE_TEXT: &str = "dimension probe";

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// The dimension is taken from the first vector, or 0 when empty.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Check that there is one vector per input and that every vector has
    /// the same size.
    pub fn check_shape(&self, expected_count: usize) -> Result<()> {
        if self.embeddings.len() != expected_count {
            return Err(EmbedError::ShapeMismatch {
                what: "vector count",
                expected: expected_count,
                actual: self.embeddings.len(),
            });
        }
        if let Some(bad) = self.embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(EmbedError::ShapeMismatch {
                what: "dimension",
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(())
    }
}

/// The embedding collaborator: maps text to fixed-size vectors.
///
/// Implementations must be deterministic enough that the same text embeds to
/// nearby vectors across calls, and must return exactly one vector per input.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_response("no embedding generated for text"))
    }

    /// Embed a batch of texts, preserving order.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Vector size, if already known without calling the model.
    fn embedding_dimension(&self) -> Option<usize>;

    /// Short backend name, e.g. `ollama`.
    fn provider_name(&self) -> &str;

    /// Identifier of the model producing the vectors.
    fn model_id(&self) -> &str;

    /// Determine the vector size, calling the model once if necessary.
    ///
    /// This is the cheapest way to find out whether the collaborator is
    /// reachable before committing to a long batch run.
    async fn probe_dimension(&self) -> Result<usize> {
        if let Some(dimension) = self.embedding_dimension() {
            return Ok(dimension);
        }
        let vector = self.embed_text(DIMENSION_PROBE_TEXT).await?;
        if vector.is_empty() {
            return Err(EmbedError::invalid_response("probe returned an empty vector"));
        }
        Ok(vector.len())
    }
}

/// Build the provider selected by `config`.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    tracing::info!(
        "Creating {} embedding provider with model {}",
        config.provider,
        config.model_name()
    );
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbedBackend::Ollama => Arc::new(OllamaEmbedProvider::new(config)?),
        EmbedBackend::FastEmbed => Arc::new(FastEmbedProvider::create(config.clone()).await?),
        EmbedBackend::Hashed => Arc::new(HashedEmbedProvider::new(config.hashed_dimension)),
    };
    Ok(provider)
}

/// Cached model entries: (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| EmbedError::model_init("embedding model lock poisoned"))
}

fn parse_fastembed_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "AllMiniLML6V2" | "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "BGESmallENV15" | "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" | "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        other => EmbeddingModel::from_str(other).map_err(|e| {
            EmbedError::invalid_config(format!("unknown fastembed model '{other}': {e}"))
        }),
    }
}

/// Local ONNX embeddings through fastembed.
///
/// Loaded models are kept in a process-wide cache keyed by configuration, so
/// creating several providers for the same model loads it only once.
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model_name: String,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("normalize", &self.config.normalize)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Load (or reuse) the configured model.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let model_name = config.model_name();
        let cache_key = Self::cache_key(&model_name);

        let cached = {
            let cache = lock(get_model_cache())?;
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((model, dimension)) = cached {
            tracing::info!("Using cached fastembed model: {}", model_name);
            return Ok(Self {
                config,
                model_name,
                model,
                dimension,
            });
        }

        let variant = parse_fastembed_model(&model_name)?;
        let name_for_task = model_name.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", name_for_task);

                let init_options = InitOptions::new(variant).with_show_download_progress(true);
                let mut model = TextEmbedding::try_new(init_options).map_err(EmbedError::model_init)?;

                // The model reports no size up front; embed once to learn it.
                let probe = model
                    .embed(vec![DIMENSION_PROBE_TEXT.to_string()], None)
                    .map_err(EmbedError::model_init)?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(0);
                if dimension == 0 {
                    return Err(EmbedError::model_init("model produced an empty embedding"));
                }

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        let model = Arc::new(Mutex::new(model));
        lock(get_model_cache())?.insert(cache_key, (Arc::clone(&model), dimension));

        Ok(Self {
            config,
            model_name,
            model,
            dimension,
        })
    }

    fn cache_key(model_name: &str) -> String {
        let mut hasher = FnvHasher::default();
        hasher.write(model_name.as_bytes());
        format!("fastembed:{:x}", hasher.finish())
    }

    pub fn clear_cache() -> Result<()> {
        lock(get_model_cache())?.clear();
        tracing::info!("Model cache cleared");
        Ok(())
    }

    pub fn cache_size() -> usize {
        lock(get_model_cache()).map(|cache| cache.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("Generating fastembed embeddings for {} texts", texts.len());

        let batch = texts.to_vec();
        let model = Arc::clone(&self.model);
        let mut embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = lock(&model)?;
            guard.embed(batch, None).map_err(EmbedError::embedding_gen)
        })
        .await??;

        if self.config.normalize {
            embeddings.iter_mut().for_each(|v| normalize(v));
        }

        let result = EmbeddingResult::new(embeddings);
        result.check_shape(texts.len())?;
        Ok(result)
    }

    fn embedding_dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }
}

/// Bag-of-tokens embeddings from hashed token counts.
///
/// Needs no model and no network, and maps identical text to identical
/// vectors on every machine. Similarity is lexical only.
#[derive(Debug, Clone)]
pub struct HashedEmbedProvider {
    dimension: usize,
    model_id: String,
}

impl HashedEmbedProvider {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashed-{dimension}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let mut hasher = FnvHasher::default();
            hasher.write(token.to_lowercase().as_bytes());
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings: Vec<Vec<f32>> = texts.iter().map(|t| self.embed_one(t)).collect();
        Ok(EmbeddingResult {
            embeddings,
            dimension: self.dimension,
        })
    }

    fn embedding_dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn provider_name(&self) -> &str {
        "hashed"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
