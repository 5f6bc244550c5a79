//! Corpus scanning, change detection, index building and query orchestration.

pub mod build_phase;
pub mod builder;
pub mod fingerprint;
pub mod orchestrator;
pub mod prompt;
pub mod scanner;

pub use build_phase::BuildPhase;
pub use builder::{BuildOutcome, BuildReport, IndexBuilder, PersistenceOutcome};
pub use fingerprint::{FileDigests, content_digest, fingerprint};
pub use orchestrator::{Answer, Orchestrator, RetrievedChunk};
pub use prompt::{DEFAULT_PROMPT_TEMPLATE, PromptTemplate, format_context};
pub use scanner::{CorpusScanner, CorpusSnapshot, FileRecord, ScanOptions, ScanReport};
