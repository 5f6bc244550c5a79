//! Directory walk producing the corpus snapshot.
//!
//! The scanner reads every eligible file under a root, keyed by lowercase
//! extension and `/`-separated path relative to the root. Excluded directory
//! names prune their whole subtree, and the index directory is never read.
//! The walk is sorted by file name, so two scans of an unchanged tree produce
//! identical snapshots.

use super::fingerprint::{FileDigests, content_digest};
use crate::config::QuarryConfig;
use crate::error::{BuildError, ScanError};
use ignore::{DirEntry, WalkBuilder};
use quarry_context::CorpusRecords;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// What the scanner reads and what it skips.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub excluded_dirs: BTreeSet<String>,
    /// Lowercase extensions to read; `None` reads everything
    pub extensions: Option<BTreeSet<String>>,
    pub respect_gitignore: bool,
    pub max_file_bytes: u64,
    /// Never descended into, wherever it sits under the root
    pub index_dir: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        QuarryConfig::default().scan_options(None)
    }
}

impl QuarryConfig {
    /// Scan options for this configuration, excluding `index_dir`.
    pub fn scan_options(&self, index_dir: Option<PathBuf>) -> ScanOptions {
        ScanOptions {
            excluded_dirs: self.scan.excluded_dirs().into_iter().collect(),
            extensions: self.scan.extensions.as_ref().map(|exts| {
                exts.iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect()
            }),
            respect_gitignore: self.scan.respect_gitignore,
            max_file_bytes: self.scan.max_file_bytes,
            index_dir,
        }
    }
}

/// A readable file that passed filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Relative to the scan root, `/`-separated
    pub path: String,
    /// Lowercase, without the dot; empty when the file has none
    pub extension: String,
    pub content: String,
    /// blake3 of the bytes on disk, before lossy decoding
    pub digest: String,
}

/// Files the scan could not include.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub files_read: usize,
    pub skipped: Vec<ScanError>,
}

/// Everything one scan read, grouped by extension then path.
#[derive(Debug, Default)]
pub struct CorpusSnapshot {
    records: CorpusRecords,
    digests: FileDigests,
    report: ScanReport,
}

impl CorpusSnapshot {
    pub fn records(&self) -> &CorpusRecords {
        &self.records
    }

    /// Raw-content digests keyed by path.
    pub fn digests(&self) -> &FileDigests {
        &self.digests
    }

    pub fn report(&self) -> &ScanReport {
        &self.report
    }

    /// Number of files in the snapshot.
    pub fn len(&self) -> usize {
        self.records.values().map(|files| files.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Files in key order.
    pub fn files(&self) -> impl Iterator<Item = FileRecord> + '_ {
        self.records.iter().flat_map(move |(extension, files)| {
            files.iter().map(move |(path, content)| FileRecord {
                path: path.clone(),
                extension: extension.clone(),
                content: content.clone(),
                digest: self.digests.get(path).cloned().unwrap_or_default(),
            })
        })
    }

    fn add(&mut self, record: FileRecord) {
        self.digests.insert(record.path.clone(), record.digest);
        self.records
            .entry(record.extension)
            .or_default()
            .insert(record.path, record.content);
        self.report.files_read += 1;
    }
}

#[derive(Debug, Clone)]
pub struct CorpusScanner {
    root: PathBuf,
    options: ScanOptions,
}

impl CorpusScanner {
    pub fn new(root: impl Into<PathBuf>, options: ScanOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the corpus. Only an unreadable root fails; per-file problems are
    /// recorded in the snapshot's report.
    pub fn scan(&self) -> Result<CorpusSnapshot, BuildError> {
        std::fs::read_dir(&self.root).map_err(|source| BuildError::Scan {
            root: self.root.clone(),
            source,
        })?;

        let options = &self.options;
        let index_dir = options
            .index_dir
            .as_ref()
            .and_then(|dir| dir.canonicalize().ok());

        let excluded = options.excluded_dirs.clone();
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .git_ignore(options.respect_gitignore)
            .git_exclude(options.respect_gitignore)
            .ignore(options.respect_gitignore)
            .parents(options.respect_gitignore)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| keep_entry(entry, &excluded, index_dir.as_deref()))
            .build();

        let mut snapshot = CorpusSnapshot::default();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    snapshot.report.skipped.push(ScanError::Walk {
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = relative_path(&self.root, entry.path());
            let extension = extension_of(entry.path());
            if let Some(allowed) = &options.extensions {
                if !allowed.contains(&extension) {
                    continue;
                }
            }

            match self.read_file(&entry, &path) {
                Ok(bytes) => {
                    debug!("Read {} ({} bytes)", path, bytes.len());
                    snapshot.add(FileRecord {
                        path,
                        extension,
                        digest: content_digest(&bytes),
                        content: String::from_utf8_lossy(&bytes).into_owned(),
                    });
                }
                Err(e) => {
                    warn!("{}", e);
                    snapshot.report.skipped.push(e);
                }
            }
        }

        info!(
            "Scanned {}: {} files read, {} skipped",
            self.root.display(),
            snapshot.report.files_read,
            snapshot.report.skipped.len()
        );
        Ok(snapshot)
    }

    fn read_file(&self, entry: &DirEntry, path: &str) -> Result<Vec<u8>, ScanError> {
        let read_error = |source| ScanError::Read {
            path: path.to_string(),
            source,
        };

        let size = entry
            .metadata()
            .map_err(|e| read_error(std::io::Error::other(e)))?
            .len();
        if size > self.options.max_file_bytes {
            return Err(ScanError::TooLarge {
                path: path.to_string(),
                size,
                limit: self.options.max_file_bytes,
            });
        }

        std::fs::read(entry.path()).map_err(read_error)
    }
}

fn keep_entry(entry: &DirEntry, excluded: &BTreeSet<String>, index_dir: Option<&Path>) -> bool {
    // The root itself is always walked, whatever its name.
    if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
        return true;
    }
    if excluded.contains(entry.file_name().to_string_lossy().as_ref()) {
        debug!("Excluding {}", entry.path().display());
        return false;
    }
    match index_dir {
        Some(index_dir) => entry
            .path()
            .canonicalize()
            .map_or(true, |path| path != index_dir),
        None => true,
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
