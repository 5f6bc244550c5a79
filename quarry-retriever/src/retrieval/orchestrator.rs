//! Query-time pipeline: ensure an index, retrieve, and answer.

use super::builder::{BuildReport, IndexBuilder};
use super::prompt::{PromptTemplate, format_context};
use crate::error::{GenerationError, QueryError};
use crate::generation::CompletionProvider;
use crate::storage::IndexStore;
use quarry_context::Chunk;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// A chunk returned for a query with its distance to the query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Euclidean distance; smaller is closer
    pub distance: f32,
}

/// A generated answer together with what it was based on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub response: String,
    pub retrieved: Vec<RetrievedChunk>,
    pub prompt: String,
}

/// Ties the index builder, the query embedding and generation together.
///
/// The index is built (or reused) on first use and kept for the lifetime of
/// the orchestrator.
pub struct Orchestrator {
    builder: IndexBuilder,
    index: OnceCell<(IndexStore, BuildReport)>,
    template: PromptTemplate,
    retries: u32,
}

impl Orchestrator {
    pub fn new(builder: IndexBuilder) -> Self {
        Self {
            builder,
            index: OnceCell::new(),
            template: PromptTemplate::default(),
            retries: 1,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Extra attempts after a failed completion request.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    /// Report of the build that produced the current store, once there is one.
    pub fn build_report(&self) -> Option<&BuildReport> {
        self.index.get().map(|(_, report)| report)
    }

    /// Build or load the index if that has not happened yet.
    pub async fn ensure_index(&self) -> Result<&IndexStore, QueryError> {
        let (store, _) = self
            .index
            .get_or_try_init(|| async {
                let outcome = self.builder.build(false).await?;
                Ok::<_, QueryError>((outcome.store, outcome.report))
            })
            .await?;
        Ok(store)
    }

    /// The `k` chunks nearest to `query`, nearest first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, QueryError> {
        let store = self.ensure_index().await?;
        if k == 0 || store.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self
            .builder
            .provider()
            .embed_text(query)
            .await
            .map_err(QueryError::search)?;
        let hits = store.search(&vector, k).map_err(QueryError::search)?;

        info!("Retrieved {} chunks for query", hits.len());
        Ok(hits
            .into_iter()
            .map(|(chunk, distance)| RetrievedChunk {
                chunk: chunk.clone(),
                distance,
            })
            .collect())
    }

    /// Retrieve context for `query` and ask `completion` to answer it.
    ///
    /// No context means no request: the model is never asked to answer from
    /// nothing. A generation failure keeps the retrieved chunks in the error.
    pub async fn answer(
        &self,
        completion: &dyn CompletionProvider,
        query: &str,
        k: usize,
    ) -> Result<Answer, QueryError> {
        let retrieved = self.retrieve(query, k).await?;
        if retrieved.is_empty() {
            return Err(QueryError::NoContext);
        }

        let context = format_context(&retrieved);
        let prompt = self.template.render(query, &context);

        let attempts = self.retries.saturating_add(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match completion.complete(&prompt).await {
                Ok(response) => {
                    return Ok(Answer {
                        response,
                        retrieved,
                        prompt,
                    });
                }
                Err(e @ GenerationError::ModelMissing { .. }) => {
                    last_error = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Generation attempt {}/{} with {} failed: {}",
                        attempt,
                        attempts,
                        completion.model(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(QueryError::Generation {
            source: last_error.unwrap_or_else(|| GenerationError::Request {
                message: "no generation attempt was made".to_string(),
            }),
            retrieved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuarryConfig;
    use async_trait::async_trait;
    use quarry_embed::HashedEmbedProvider;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct ScriptedCompletion {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletion {
        async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(GenerationError::Request {
                    message: "502 Bad Gateway".to_string(),
                });
            }
            Ok(format!("answered {} bytes", prompt.len()))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn orchestrator(root: &std::path::Path) -> Orchestrator {
        let mut config = QuarryConfig::default();
        config.chunking.chunk_size = 40;
        let provider = Arc::new(HashedEmbedProvider::new(16));
        Orchestrator::new(IndexBuilder::new(root, &config, provider).unwrap())
    }

    #[tokio::test]
    async fn test_retrieve_bounds() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def login(user):\n    return True\n").unwrap();
        std::fs::write(dir.path().join("b.md"), "# Notes").unwrap();

        let orchestrator = orchestrator(dir.path());
        assert!(orchestrator.retrieve("login", 0).await.unwrap().is_empty());

        let all = orchestrator.retrieve("login", 100).await.unwrap();
        let total = orchestrator.ensure_index().await.unwrap().len();
        assert_eq!(all.len(), total);
        assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(orchestrator.build_report().unwrap().built);
    }

    #[tokio::test]
    async fn test_empty_corpus_gives_no_context() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let completion = ScriptedCompletion {
            failures: 0,
            calls: AtomicUsize::new(0),
        };

        let err = orchestrator.answer(&completion, "anything", 10).await.unwrap_err();
        assert!(matches!(err, QueryError::NoContext));
        assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_answer_retries_once() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn add(a: i32, b: i32) -> i32 { a + b }").unwrap();
        let orchestrator = orchestrator(dir.path());

        let flaky = ScriptedCompletion {
            failures: 1,
            calls: AtomicUsize::new(0),
        };
        let answer = orchestrator.answer(&flaky, "how do I add", 5).await.unwrap();
        assert!(answer.response.starts_with("answered"));
        assert!(answer.prompt.contains("**Path:** `lib.rs`"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

        let down = ScriptedCompletion {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        match orchestrator.answer(&down, "how do I add", 5).await {
            Err(QueryError::Generation { retrieved, .. }) => assert!(!retrieved.is_empty()),
            other => panic!("expected generation failure, got {other:?}"),
        }
        assert_eq!(down.calls.load(Ordering::SeqCst), 2);
    }
}
