//! Extension to language lookup and per-language delimiter sets.
//!
//! The lookup is data, not dispatch: a [`LanguageTable`] maps lowercase file
//! extensions to language tags, and each tag resolves to an ordered list of
//! regular expressions used by [`TextSplitter`](crate::text::TextSplitter).
//! Delimiters are ordered from most significant (declarations, blocks) to
//! least significant (single spaces). Tags without a delimiter set, and
//! extensions without a tag, fall back to [`GENERIC_DELIMITERS`].
//!
//! Configuration can extend both halves of the table:
//!
//! ```
//! use quarry_context::LanguageTable;
//!
//! let table = LanguageTable::builtin()
//!     .with_extension("zig", "zig")
//!     .with_delimiters("zig", vec![r"(?m)^\s*(?:pub\s+)?fn\s".to_string(), r"\n\n".to_string()]);
//!
//! assert_eq!(table.language_for("zig"), Some("zig"));
//! assert_eq!(table.language_for("py"), Some("python"));
//! assert_eq!(table.language_for("unknown"), None);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Language tag recorded for files whose extension has no mapping.
pub const TEXT_LANGUAGE: &str = "text";

/// Delimiters for content without a recognised language.
pub const GENERIC_DELIMITERS: &[&str] = &[r"\n\n", r"\n", r" "];

const PYTHON: &[&str] = &[
    r"(?m)^[ \t]*class\s",
    r"(?m)^[ \t]*(?:async[ \t]+)?def\s",
    r"\n\n",
    r"\n",
    r" ",
];

const C_FAMILY: &[&str] = &[
    r"(?m)^[ \t]*(?:class|struct|enum|union|namespace|template|typedef)\b",
    r"(?m)^[ \t]*(?:if|for|while|do|switch|case)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const GO: &[&str] = &[
    r"(?m)^[ \t]*(?:func|var|const|type)\b",
    r"(?m)^[ \t]*(?:if|for|switch|case)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const JVM: &[&str] = &[
    r"(?m)^[ \t]*(?:class|interface|enum|object|trait|fun|def|public|protected|private|static|val|var)\b",
    r"(?m)^[ \t]*(?:if|for|while|do|switch|case|when|match)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const CSHARP: &[&str] = &[
    r"(?m)^[ \t]*(?:namespace|interface|enum|class|struct|record)\b",
    r"(?m)^[ \t]*(?:public|private|protected|internal|static|void|int|float|double|decimal|bool|char|string|var)\b",
    r"(?m)^[ \t]*(?:if|for|foreach|while|do|switch|case|break|continue|return)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const ECMASCRIPT: &[&str] = &[
    r"(?m)^[ \t]*(?:export[ \t]+)?(?:default[ \t]+)?(?:async[ \t]+)?(?:function|class|interface|enum|type)\b",
    r"(?m)^[ \t]*(?:const|let|var)\b",
    r"(?m)^[ \t]*(?:if|for|while|switch|case|default)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const PHP: &[&str] = &[
    r"(?m)^[ \t]*(?:function|class|interface|trait|namespace)\b",
    r"(?m)^[ \t]*(?:if|foreach|while|do|switch|case)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const PROTO: &[&str] = &[
    r"(?m)^[ \t]*(?:package|message|service|enum|option|import|syntax)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const RST: &[&str] = &[
    r"(?m)^[=\-`:'~^_*+#]{3,}[ \t]*$",
    r"(?m)^\.\. ",
    r"\n\n",
    r"\n",
    r" ",
];

const RUBY: &[&str] = &[
    r"(?m)^[ \t]*(?:def|class|module)\b",
    r"(?m)^[ \t]*(?:if|unless|while|for|do|begin|rescue)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const RUST: &[&str] = &[
    r"(?m)^[ \t]*(?:pub(?:\([^)\n]*\))?[ \t]+)?(?:async[ \t]+)?(?:fn|struct|enum|trait|impl|mod|const|static|type)\b",
    r"(?m)^[ \t]*(?:let|if|while|for|loop|match)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const SWIFT: &[&str] = &[
    r"(?m)^[ \t]*(?:func|class|struct|enum|protocol|extension)\b",
    r"(?m)^[ \t]*(?:if|for|while|do|switch|case|guard)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const MARKDOWN: &[&str] = &[
    r"(?m)^#{1,6}[ \t]",
    r"```",
    r"(?m)^(?:\*{3,}|-{3,}|_{3,})[ \t]*$",
    r"\n\n",
    r"\n",
    r" ",
];

const LATEX: &[&str] = &[
    r"\\(?:chapter|section|subsection|subsubsection)\{",
    r"\\begin\{(?:enumerate|itemize|description|list|quote|quotation|verse|verbatim)\}",
    r"\\item\b",
    r"\n\n",
    r"\n",
    r" ",
];

const HTML: &[&str] = &[
    r"(?i)<(?:body|div|p|br|li|h[1-6]|span|table|tr|td|th|ul|ol|header|footer|nav|head|style|script|meta|title)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const SOLIDITY: &[&str] = &[
    r"(?m)^[ \t]*(?:pragma|using|contract|interface|library|constructor|type|function|event|modifier|error|struct|enum)\b",
    r"(?m)^[ \t]*(?:if|for|while|do|assembly)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const COBOL: &[&str] = &[
    r"(?mi)^[ \t]*(?:IDENTIFICATION|ENVIRONMENT|DATA|PROCEDURE)[ \t]+DIVISION",
    r"(?mi)^[ \t]*(?:WORKING-STORAGE|LINKAGE|FILE)[ \t]+SECTION",
    r"(?mi)^[ \t]*(?:PERFORM|CALL|MOVE|COMPUTE|IF|EVALUATE)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const LUA: &[&str] = &[
    r"(?m)^[ \t]*(?:local[ \t]+)?function\b",
    r"(?m)^[ \t]*(?:local|if|for|while|repeat)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const PERL: &[&str] = &[
    r"(?m)^[ \t]*(?:sub|package)\b",
    r"(?m)^[ \t]*(?:if|unless|while|for|foreach)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const HASKELL: &[&str] = &[
    r"(?m)^(?:module|import|data|type|newtype|class|instance)\b",
    r"(?m)^[a-z_][A-Za-z0-9_']*[ \t]*::",
    r"(?m)^[ \t]+(?:where|let|in|do|of)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const ELIXIR: &[&str] = &[
    r"(?m)^[ \t]*(?:defmodule|defprotocol|defimpl|defmacrop?|defp?)\b",
    r"(?m)^[ \t]*(?:if|unless|cond|case|with|for)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const POWERSHELL: &[&str] = &[
    r"(?mi)^[ \t]*(?:function|class|enum|param)\b",
    r"(?mi)^[ \t]*(?:if|foreach|for|while|switch)\b",
    r"\n\n",
    r"\n",
    r" ",
];

const VISUAL_BASIC: &[&str] = &[
    r"(?mi)^[ \t]*(?:(?:Public|Private|Friend)[ \t]+)?(?:Sub|Function|Property)\b",
    r"(?mi)^[ \t]*(?:If|For|Do|While|Select)\b",
    r"\n\n",
    r"\n",
    r" ",
];

/// Built-in delimiter set for a language tag, if one exists.
pub fn builtin_delimiters(language: &str) -> Option<&'static [&'static str]> {
    let delimiters = match language {
        "python" => PYTHON,
        "c" | "cpp" => C_FAMILY,
        "go" => GO,
        "java" | "kotlin" | "scala" => JVM,
        "csharp" => CSHARP,
        "js" | "ts" => ECMASCRIPT,
        "php" => PHP,
        "proto" => PROTO,
        "rst" => RST,
        "ruby" => RUBY,
        "rust" => RUST,
        "swift" => SWIFT,
        "markdown" => MARKDOWN,
        "latex" => LATEX,
        "html" => HTML,
        "sol" => SOLIDITY,
        "cobol" => COBOL,
        "lua" => LUA,
        "perl" => PERL,
        "haskell" => HASKELL,
        "elixir" => ELIXIR,
        "powershell" => POWERSHELL,
        "visualbasic6" => VISUAL_BASIC,
        _ => return None,
    };
    Some(delimiters)
}

const BUILTIN_EXTENSIONS: &[(&str, &str)] = &[
    ("py", "python"),
    ("ts", "ts"),
    ("js", "js"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("cxx", "cpp"),
    ("c", "c"),
    ("go", "go"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("php", "php"),
    ("proto", "proto"),
    ("rst", "rst"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("scala", "scala"),
    ("swift", "swift"),
    ("md", "markdown"),
    ("tex", "latex"),
    ("html", "html"),
    ("htm", "html"),
    ("sol", "sol"),
    ("cs", "csharp"),
    ("cob", "cobol"),
    ("lua", "lua"),
    ("pl", "perl"),
    ("hs", "haskell"),
    ("ex", "elixir"),
    ("exs", "elixir"),
    ("ps1", "powershell"),
    ("vb", "visualbasic6"),
];

/// Extension → language tag table, plus delimiter sets for tags that have no
/// built-in splitting rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageTable {
    /// Lowercase extension (no dot) to language tag
    pub extensions: BTreeMap<String, String>,
    /// Language tag to delimiter patterns, overriding the built-in set
    pub delimiters: BTreeMap<String, Vec<String>>,
}

impl LanguageTable {
    /// Table with no mappings; every file is chunked as generic text.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table seeded with the built-in extension mappings.
    pub fn builtin() -> Self {
        let extensions = BUILTIN_EXTENSIONS
            .iter()
            .map(|(ext, tag)| (ext.to_string(), tag.to_string()))
            .collect();
        Self {
            extensions,
            delimiters: BTreeMap::new(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>, language: impl Into<String>) -> Self {
        self.extensions
            .insert(extension.into().to_lowercase(), language.into());
        self
    }

    pub fn with_delimiters(mut self, language: impl Into<String>, patterns: Vec<String>) -> Self {
        self.delimiters.insert(language.into(), patterns);
        self
    }

    /// Layer `overrides` on top of this table; entries in `overrides` win.
    pub fn merge(&mut self, overrides: &LanguageTable) {
        for (ext, tag) in &overrides.extensions {
            self.extensions.insert(ext.to_lowercase(), tag.clone());
        }
        for (tag, patterns) in &overrides.delimiters {
            self.delimiters.insert(tag.clone(), patterns.clone());
        }
    }

    /// Language tag for an extension, if the extension is mapped.
    pub fn language_for(&self, extension: &str) -> Option<&str> {
        self.extensions
            .get(&extension.to_lowercase())
            .map(String::as_str)
    }

    /// Delimiter patterns for a language tag.
    ///
    /// Configured patterns take precedence over built-in ones; a tag known to
    /// neither gets [`GENERIC_DELIMITERS`].
    pub fn delimiters_for(&self, language: &str) -> Vec<&str> {
        if let Some(patterns) = self.delimiters.get(language) {
            return patterns.iter().map(String::as_str).collect();
        }
        builtin_delimiters(language)
            .unwrap_or(GENERIC_DELIMITERS)
            .to_vec()
    }

    /// All extensions with a language mapping, sorted.
    pub fn known_extensions(&self) -> Vec<&str> {
        self.extensions.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_every_builtin_mapping_has_compilable_delimiters() {
        let table = LanguageTable::builtin();
        for (ext, tag) in &table.extensions {
            let patterns = builtin_delimiters(tag)
                .unwrap_or_else(|| panic!("no delimiters for {tag} ({ext})"));
            for pattern in patterns {
                assert!(Regex::new(pattern).is_ok(), "bad pattern {pattern} for {tag}");
            }
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = LanguageTable::builtin();
        assert_eq!(table.language_for("PY"), Some("python"));
        assert_eq!(table.language_for("Htm"), Some("html"));
        assert_eq!(table.language_for("txt"), None);
    }

    #[test]
    fn test_merge_overrides_and_extends() {
        let mut table = LanguageTable::builtin();
        let overrides = LanguageTable::empty()
            .with_extension("txt", "markdown")
            .with_extension("py", "text-python")
            .with_delimiters("text-python", vec![r"\n".to_string()]);

        table.merge(&overrides);

        assert_eq!(table.language_for("txt"), Some("markdown"));
        assert_eq!(table.language_for("py"), Some("text-python"));
        assert_eq!(table.delimiters_for("text-python"), vec![r"\n"]);
        assert_eq!(table.delimiters_for("markdown"), MARKDOWN.to_vec());
        assert_eq!(table.delimiters_for("nothing"), GENERIC_DELIMITERS.to_vec());
    }
}
