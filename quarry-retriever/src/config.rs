//! Configuration for the indexing and retrieval pipeline.
//!
//! Settings come from a TOML file (`--config`, or `quarry.toml` in the corpus
//! root when present), then environment overrides, then validation. Every
//! section and every key is optional.
//!
//! ```toml
//! [scan]
//! exclude_dirs = ["fixtures"]
//! extensions = ["rs", "py", "md"]
//! respect_gitignore = true
//!
//! [chunking]
//! chunk_size = 500
//! overlap = 50
//!
//! [chunking.languages]
//! zig = "zig"
//!
//! [chunking.delimiters]
//! zig = ["\\n(?:pub )?fn ", "\\n\\n", "\\n", " "]
//!
//! [index]
//! batch_size = 64
//! embed_concurrency = 2
//!
//! [embedding]
//! provider = "ollama"
//! model = "all-minilm:33m"
//!
//! [generation]
//! model = "gpt-oss:20b"
//!
//! [retrieval]
//! top_k = 10
//! ```

use quarry_context::{ChunkError, LanguageTable};
use quarry_embed::EmbedConfig;
use quarry_embed::config::DEFAULT_OLLAMA_URL;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the corpus root when no config path is given.
pub const CONFIG_FILE_NAME: &str = "quarry.toml";

/// Default index directory name, relative to the corpus root.
pub const DEFAULT_INDEX_DIR: &str = ".quarry";

/// Directory names never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "vendor",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    ".vscode",
    ".idea",
    "build",
    "dist",
    ".mypy_cache",
    ".pytest_cache",
    "Include",
    "Lib",
    "Scripts",
];

pub const ENV_OLLAMA_URL: &str = "QUARRY_OLLAMA_URL";
pub const ENV_EMBED_MODEL: &str = "QUARRY_EMBED_MODEL";
pub const ENV_LLM_MODEL: &str = "QUARRY_LLM_MODEL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Directory names excluded in addition to the defaults
    pub exclude_dirs: Vec<String>,
    /// Only read files with these extensions (lowercase, no dot)
    pub extensions: Option<Vec<String>>,
    /// Also honour `.gitignore` and `.ignore` files
    pub respect_gitignore: bool,
    /// Larger files are skipped and reported
    pub max_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: Vec::new(),
            extensions: None,
            respect_gitignore: false,
            max_file_bytes: 1024 * 1024,
        }
    }
}

impl ScanConfig {
    /// Default exclusions plus the configured extras.
    pub fn excluded_dirs(&self) -> Vec<String> {
        let mut dirs: Vec<String> = DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect();
        for extra in &self.exclude_dirs {
            if !dirs.contains(extra) {
                dirs.push(extra.clone());
            }
        }
        dirs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters repeated from the end of the previous chunk
    pub overlap: usize,
    /// Extra or overriding extension → language mappings
    pub languages: BTreeMap<String, String>,
    /// Delimiter patterns per language tag, most significant first
    pub delimiters: BTreeMap<String, Vec<String>>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 0,
            languages: BTreeMap::new(),
            delimiters: BTreeMap::new(),
        }
    }
}

impl ChunkingConfig {
    /// Built-in language rules with the configured overrides applied.
    pub fn language_table(&self) -> LanguageTable {
        let mut overrides = LanguageTable::empty();
        for (extension, language) in &self.languages {
            overrides = overrides.with_extension(extension.as_str(), language.as_str());
        }
        for (language, patterns) in &self.delimiters {
            overrides = overrides.with_delimiters(language.as_str(), patterns.clone());
        }
        let mut table = LanguageTable::builtin();
        table.merge(&overrides);
        table
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Where generations are stored; relative paths are resolved against the
    /// corpus root. Defaults to `<root>/.quarry`.
    pub dir: Option<PathBuf>,
    /// Chunks per embedding request
    pub batch_size: usize,
    /// Embedding requests in flight at once
    pub embed_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: None,
            batch_size: 64,
            embed_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub model: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Immediate retries after a failed completion request
    pub retries: u32,
    /// Confirm the model is installed before asking
    pub check_model: bool,
    /// Replaces the built-in prompt; must contain `{query}` and `{context}`
    pub prompt_template: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-oss:20b".to_string(),
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            request_timeout_secs: 600,
            retries: 1,
            check_model: true,
            prompt_template: None,
        }
    }
}

impl GenerationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Number of chunks handed to generation
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 10 }
    }
}

/// Complete configuration, one field per TOML section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuarryConfig {
    pub scan: ScanConfig,
    pub chunking: ChunkingConfig,
    pub index: IndexConfig,
    pub embedding: EmbedConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
}

impl QuarryConfig {
    /// Load configuration for the corpus at `root`.
    ///
    /// An explicit path must exist. Without one, `<root>/quarry.toml` is used
    /// if present and defaults otherwise. Environment overrides are applied
    /// and the result is validated.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let candidate = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = root.join(CONFIG_FILE_NAME);
                default.is_file().then_some(default)
            }
        };

        let mut config = match candidate {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Self::from_toml_str(&text).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => {
                tracing::debug!("No configuration file, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `QUARRY_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_OLLAMA_URL).filter(|v| !v.is_empty()) {
            self.embedding.base_url = url.clone();
            self.generation.base_url = url;
        }
        if let Some(model) = lookup(ENV_EMBED_MODEL).filter(|v| !v.is_empty()) {
            self.embedding.model = Some(model);
        }
        if let Some(model) = lookup(ENV_LLM_MODEL).filter(|v| !v.is_empty()) {
            self.generation.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ChunkError::check_geometry(self.chunking.chunk_size, self.chunking.overlap)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.index.batch_size == 0 {
            return Err(ConfigError::Invalid("index.batch_size must be at least 1".into()));
        }
        if self.index.embed_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "index.embed_concurrency must be at least 1".into(),
            ));
        }
        if self.generation.model.trim().is_empty() {
            return Err(ConfigError::Invalid("generation.model is empty".into()));
        }
        if let Some(template) = &self.generation.prompt_template {
            for placeholder in ["{query}", "{context}"] {
                if !template.contains(placeholder) {
                    return Err(ConfigError::Invalid(format!(
                        "generation.prompt_template is missing {placeholder}"
                    )));
                }
            }
        }
        self.embedding
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Resolved index directory for the corpus at `root`.
    pub fn index_dir(&self, root: &Path) -> PathBuf {
        match &self.index.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join(DEFAULT_INDEX_DIR),
        }
    }
}
