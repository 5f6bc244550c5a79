//! Recursive delimiter-based text splitting.
//!
//! [`TextSplitter`] breaks file content into bounded chunks. It first cuts the
//! text at the most significant delimiter (for code, typically declarations),
//! recursing into any piece that is still too large with the next delimiter
//! in the list, and finally hard-splits by characters once the delimiters are
//! exhausted. The resulting atomic segments are then merged greedily into
//! chunks of at most `chunk_size - overlap` characters, and every chunk after
//! the first is extended backwards by `overlap` characters of the preceding
//! text.
//!
//! All sizes are measured in characters, never bytes, so multi-byte content
//! is never cut inside a code point.
//!
//! ```
//! use quarry_context::text::TextSplitter;
//!
//! let splitter = TextSplitter::new(&[r"\n\n", r"\n", r" "], 30, 5).unwrap();
//! let content = "first paragraph here\n\nsecond paragraph here\n\nthird one";
//! let chunks = splitter.split("notes.txt", content);
//!
//! assert!(chunks.len() > 1);
//! assert!(chunks.iter().all(|c| c.chunk_text.chars().count() <= 30));
//!
//! // Dropping each chunk's overlap restores the original text.
//! let rebuilt: String = chunks.iter().map(|c| c.core_text()).collect();
//! assert_eq!(rebuilt, content);
//! ```

use crate::error::ChunkError;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;

/// A span of one file's content produced by [`TextSplitter::split`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    /// Path of the source file
    pub path: String,
    /// Position of this chunk within the file (0-indexed)
    pub sequence: usize,
    /// The chunk text, including any leading overlap
    pub chunk_text: String,
    /// Number of leading characters repeated from the previous chunk
    pub overlap: usize,
}

impl TextChunk {
    /// The chunk text with the leading overlap removed.
    pub fn core_text(&self) -> &str {
        match self.chunk_text.char_indices().nth(self.overlap) {
            Some((idx, _)) => &self.chunk_text[idx..],
            None => "",
        }
    }
}

/// Splits text into bounded, optionally overlapping chunks.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    delimiters: Vec<Regex>,
    chunk_size: usize,
    overlap: usize,
}

impl TextSplitter {
    /// Compile `delimiter_patterns` into a splitter.
    ///
    /// Patterns are applied in order, most significant first. Fails if a
    /// pattern does not compile or if `overlap >= chunk_size`.
    pub fn new(
        delimiter_patterns: &[&str],
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Self, ChunkError> {
        Self::for_language("custom", delimiter_patterns, chunk_size, overlap)
    }

    /// Like [`new`](Self::new), naming the language in compile errors.
    pub fn for_language(
        language: &str,
        delimiter_patterns: &[&str],
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Self, ChunkError> {
        ChunkError::check_geometry(chunk_size, overlap)?;

        let delimiters = delimiter_patterns
            .iter()
            .map(|&pattern| {
                Regex::new(pattern).map_err(|source| ChunkError::InvalidDelimiter {
                    language: language.to_string(),
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            delimiters,
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `content` into chunks attributed to `path`.
    ///
    /// Empty content yields no chunks.
    pub fn split(&self, path: &str, content: &str) -> Vec<TextChunk> {
        let budget = self.chunk_size - self.overlap;
        let segments = self.split_recursively_into_segments(content, 0, budget, 0);

        let mut cores: Vec<Range<usize>> = Vec::new();
        let mut current: Option<(Range<usize>, usize)> = None;

        for segment in segments {
            let segment_chars = content[segment.clone()].chars().count();
            current = match current {
                Some((range, chars)) if chars + segment_chars > budget => {
                    cores.push(range);
                    Some((segment, segment_chars))
                }
                Some((range, chars)) => Some((range.start..segment.end, chars + segment_chars)),
                None => Some((segment, segment_chars)),
            };
        }
        if let Some((range, _)) = current {
            cores.push(range);
        }

        cores
            .into_iter()
            .enumerate()
            .map(|(sequence, core)| {
                let start = if sequence == 0 {
                    core.start
                } else {
                    self.overlap_start(content, core.start)
                };
                TextChunk {
                    path: path.to_string(),
                    sequence,
                    chunk_text: content[start..core.end].to_string(),
                    overlap: content[start..core.start].chars().count(),
                }
            })
            .collect()
    }

    /// Byte offset `overlap` characters before `core_start`, clamped to 0.
    fn overlap_start(&self, content: &str, core_start: usize) -> usize {
        if self.overlap == 0 {
            return core_start;
        }
        content[..core_start]
            .char_indices()
            .rev()
            .nth(self.overlap - 1)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    // Returns byte ranges of atomic segments in order, each no longer than
    // `max_chars` once all delimiters are exhausted. A delimiter match opens
    // the piece that follows it, so a boundary never separates a declaration
    // keyword from its name.
    fn split_recursively_into_segments(
        &self,
        text: &str,
        delimiter_idx: usize,
        max_chars: usize,
        offset: usize,
    ) -> Vec<Range<usize>> {
        let mut segments = Vec::new();

        if text.is_empty() {
            return segments;
        }

        if text.chars().count() <= max_chars {
            segments.push(offset..offset + text.len());
            return segments;
        }

        let Some(delimiter) = self.delimiters.get(delimiter_idx) else {
            let boundaries: Vec<usize> = text
                .char_indices()
                .map(|(idx, _)| idx)
                .step_by(max_chars)
                .chain(std::iter::once(text.len()))
                .collect();
            for window in boundaries.windows(2) {
                segments.push(offset + window[0]..offset + window[1]);
            }
            return segments;
        };

        let mut local_start = 0;
        for mat in delimiter.find_iter(text) {
            if mat.start() == mat.end() || mat.start() == local_start {
                continue;
            }
            segments.extend(self.split_recursively_into_segments(
                &text[local_start..mat.start()],
                delimiter_idx + 1,
                max_chars,
                offset + local_start,
            ));
            local_start = mat.start();
        }

        if local_start < text.len() {
            segments.extend(self.split_recursively_into_segments(
                &text[local_start..],
                delimiter_idx + 1,
                max_chars,
                offset + local_start,
            ));
        }

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{GENERIC_DELIMITERS, builtin_delimiters};

    fn rebuild(chunks: &[TextChunk]) -> String {
        chunks.iter().map(|c| c.core_text()).collect()
    }

    #[test]
    fn test_generic_chunk_count_is_ceiling() {
        let splitter = TextSplitter::new(GENERIC_DELIMITERS, 20, 0).unwrap();
        for len in [1usize, 19, 20, 21, 40, 41, 99, 100] {
            let content = "x".repeat(len);
            let chunks = splitter.split("blob.txt", &content);
            assert_eq!(chunks.len(), len.div_ceil(20), "length {len}");
            assert_eq!(rebuild(&chunks), content);
        }
    }

    #[test]
    fn test_python_chunk_count_without_boundaries() {
        let python = builtin_delimiters("python").unwrap();
        let splitter = TextSplitter::new(python, 20, 0).unwrap();
        // 40 characters, no delimiter matches at all
        let content = "print('aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa')";
        assert_eq!(content.len(), 40);

        let chunks = splitter.split("a.py", content);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_text.len(), 20);
    }

    #[test]
    fn test_python_prefers_def_boundaries() {
        let python = builtin_delimiters("python").unwrap();
        let content = "def alpha():\n    return 1\n\ndef beta():\n    return 2\n";
        let splitter = TextSplitter::new(python, 30, 0).unwrap();

        let chunks = splitter.split("m.py", content);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].chunk_text.starts_with("def alpha"));
        assert!(chunks[1].chunk_text.starts_with("def beta"));
        assert_eq!(rebuild(&chunks), content);
    }

    #[test]
    fn test_declaration_keyword_stays_with_its_name() {
        let python = builtin_delimiters("python").unwrap();
        let splitter = TextSplitter::new(python, 30, 0).unwrap();
        let content = "x = 11111111111111111111\ndef f():\n    return 2\n";

        let chunks = splitter.split("m.py", content);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_text, "x = 11111111111111111111\n");
        assert_eq!(chunks[1].chunk_text, "def f():\n    return 2\n");
        assert_eq!(rebuild(&chunks), content);
    }

    #[test]
    fn test_rust_items_start_chunks() {
        let rust = builtin_delimiters("rust").unwrap();
        let splitter = TextSplitter::new(rust, 40, 0).unwrap();
        let content = "use std::io;\n\npub fn read() -> u8 { 1 }\n\nfn write() {}\n";

        let chunks = splitter.split("lib.rs", content);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().skip(1).all(|c| c.chunk_text.starts_with("pub fn") || c.chunk_text.starts_with("fn")));
        assert!(chunks.iter().all(|c| !c.chunk_text.trim_end().ends_with("fn")));
        assert_eq!(rebuild(&chunks), content);
    }

    #[test]
    fn test_overlap_is_exact() {
        let splitter = TextSplitter::new(GENERIC_DELIMITERS, 10, 3).unwrap();
        let content = "abcdefghijklmnopqrstuvwxyz";
        let chunks = splitter.split("letters", content);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].overlap, 0);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert_eq!(next.overlap, 3);
            let prev_tail: String = prev.chunk_text.chars().rev().take(3).collect::<Vec<_>>().into_iter().rev().collect();
            let next_head: String = next.chunk_text.chars().take(3).collect();
            assert_eq!(prev_tail, next_head);
        }
        assert!(chunks.iter().all(|c| c.chunk_text.chars().count() <= 10));
        assert_eq!(rebuild(&chunks), content);
    }

    #[test]
    fn test_multibyte_content_is_split_on_char_boundaries() {
        let splitter = TextSplitter::new(&[], 4, 1).unwrap();
        let content = "ééééééééé";
        let chunks = splitter.split("accents", content);

        assert!(chunks.iter().all(|c| c.chunk_text.chars().count() <= 4));
        assert_eq!(rebuild(&chunks), content);
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        let splitter = TextSplitter::new(GENERIC_DELIMITERS, 10, 0).unwrap();
        assert!(splitter.split("empty", "").is_empty());
    }

    #[test]
    fn test_sequences_are_dense() {
        let splitter = TextSplitter::new(GENERIC_DELIMITERS, 8, 0).unwrap();
        let chunks = splitter.split("s", "one two three four five six seven");
        let sequences: Vec<usize> = chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_geometry_is_rejected() {
        assert!(matches!(
            TextSplitter::new(GENERIC_DELIMITERS, 10, 10),
            Err(ChunkError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            TextSplitter::new(GENERIC_DELIMITERS, 0, 0),
            Err(ChunkError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = TextSplitter::for_language("broken", &[r"(unclosed"], 10, 0).unwrap_err();
        match err {
            ChunkError::InvalidDelimiter { language, pattern, .. } => {
                assert_eq!(language, "broken");
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
