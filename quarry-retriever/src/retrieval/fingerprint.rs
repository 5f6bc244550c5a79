//! Content-addressed change detection for a whole corpus.

use serde_json::Value;
use std::collections::BTreeMap;

/// Per-file content digests keyed by relative path.
pub type FileDigests = BTreeMap<String, String>;

/// Hex-encoded blake3 digest of raw file content.
pub fn content_digest(content: impl AsRef<[u8]>) -> String {
    hex::encode(blake3::hash(content.as_ref()).as_bytes())
}

/// Digest of the corpus: blake3 over the JSON list of `[path, digest]`
/// pairs sorted by path.
///
/// Paths are relative, so the same tree gives the same fingerprint on any
/// machine. Any added, removed or edited file changes it, including edits
/// that read back identically after lossy UTF-8 decoding.
pub fn fingerprint(digests: &FileDigests) -> String {
    let listing = Value::Array(
        digests
            .iter()
            .map(|(path, digest)| {
                Value::Array(vec![Value::from(path.as_str()), Value::from(digest.as_str())])
            })
            .collect(),
    );
    content_digest(listing.to_string())
}
