//! quarry-retriever: incremental codebase indexing and retrieval
//!
//! This crate turns a source tree into a persisted vector index and serves
//! nearest-neighbour retrieval for codebase Q&A. Indexing is incremental at
//! corpus granularity: an unchanged tree reuses the stored index without a
//! single embedding call.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: scanner, fingerprint, batched builder and query orchestrator
//! - **[`storage`]**: vector index trait, flat index and generation-based persistence
//! - **[`generation`]**: the completion collaborator used to answer questions
//! - **[`config`]**: `quarry.toml` loading and validation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarry_embed::create_provider;
//! use quarry_retriever::config::QuarryConfig;
//! use quarry_retriever::retrieval::{IndexBuilder, Orchestrator};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let root = Path::new(".");
//! let config = QuarryConfig::load(root, None)?;
//! let provider = create_provider(&config.embedding).await?;
//!
//! let orchestrator = Orchestrator::new(IndexBuilder::new(root, &config, provider)?);
//! for hit in orchestrator.retrieve("where is the config parsed?", 5).await? {
//!     println!("{:.3} {}", hit.distance, hit.chunk.metadata.path);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! CorpusScanner → Chunker → fingerprint → IndexBuilder → IndexDirectory
//!                                              ↓
//!                  CompletionProvider ← Orchestrator ← IndexStore
//! ```

pub mod config;
pub mod error;
pub mod generation;
pub mod retrieval;
pub mod storage;
