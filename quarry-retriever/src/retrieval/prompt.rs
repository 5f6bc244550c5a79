//! Context bundle and prompt rendering for the answer step.

use super::orchestrator::RetrievedChunk;
use std::fmt::Write;

/// Used when `generation.prompt_template` is not set.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"You are a code assistant. Based on the user's query: "{query}"

Analyze the following code snippets and provide a response in MARKDOWN format with:

1. **File Paths**: List all relevant file paths
2. **Code Explanation**: Explain what the provided code does and how it works (only use the code that is provided as snippets)

Use proper markdown formatting with headers, code blocks, and lists.
Avoid special Unicode characters such as em-dashes, en-dashes or fancy quotes.

Here are the relevant code snippets:
{context}

Respond in markdown format only using standard ASCII characters.
"#;

/// Render retrieved chunks in rank order, metadata first, then the text.
pub fn format_context(retrieved: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for hit in retrieved {
        let metadata = &hit.chunk.metadata;
        // Writing to a String cannot fail.
        let _ = writeln!(context, "**File:** {}", metadata.filename);
        let _ = writeln!(context, "**Path:** `{}`", metadata.path);
        let _ = writeln!(context, "**Extension:** {}", metadata.extension);
        let _ = writeln!(context, "**Language:** {}", metadata.language);
        let _ = writeln!(context, "**Distance:** {:.4}", hit.distance);
        let _ = writeln!(context, "**Code:**");
        let _ = writeln!(context, "```{}", fence_tag(&metadata.language));
        context.push_str(&hit.chunk.text);
        if !hit.chunk.text.ends_with('\n') {
            context.push('\n');
        }
        context.push_str("```\n\n");
    }
    context
}

fn fence_tag(language: &str) -> &str {
    match language {
        "text" => "",
        other => other,
    }
}

/// A prompt with `{query}` and `{context}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_TEMPLATE)
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Substitute both placeholders in one pass, so braces inside the query
    /// or the retrieved code are never expanded.
    pub fn render(&self, query: &str, context: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + query.len() + context.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(after) = tail.strip_prefix("{query}") {
                out.push_str(query);
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{context}") {
                out.push_str(context);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_context::{Chunk, ChunkMetadata};

    fn hit(path: &str, language: &str, text: &str, distance: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                text: text.to_string(),
                metadata: ChunkMetadata {
                    filename: path.rsplit('/').next().unwrap().to_string(),
                    path: path.to_string(),
                    extension: path.rsplit('.').next().unwrap().to_string(),
                    language: language.to_string(),
                },
                sequence: 0,
                overlap: 0,
            },
            distance,
        }
    }

    #[test]
    fn test_format_context() {
        let context = format_context(&[
            hit("src/auth.py", "python", "def login(): pass", 0.25),
            hit("notes.txt", "text", "remember\n", 0.5),
        ]);

        let expected = "**File:** auth.py\n\
                        **Path:** `src/auth.py`\n\
                        **Extension:** py\n\
                        **Language:** python\n\
                        **Distance:** 0.2500\n\
                        **Code:**\n\
                        ```python\n\
                        def login(): pass\n\
                        ```\n\n\
                        **File:** notes.txt\n\
                        **Path:** `notes.txt`\n\
                        **Extension:** txt\n\
                        **Language:** text\n\
                        **Distance:** 0.5000\n\
                        **Code:**\n\
                        ```\n\
                        remember\n\
                        ```\n\n";
        assert_eq!(context, expected);
    }

    #[test]
    fn test_empty_context() {
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn test_render_substitutes_once() {
        let template = PromptTemplate::new("Q: {query}\nC: {context}\n{other}");
        let rendered = template.render("what is {context}?", "fn a() { b() }");
        assert_eq!(rendered, "Q: what is {context}?\nC: fn a() { b() }\n{other}");
    }

    #[test]
    fn test_default_template_has_placeholders() {
        let rendered = PromptTemplate::default().render("how does login work", "CTX");
        assert!(rendered.contains("\"how does login work\""));
        assert!(rendered.contains("CTX"));
        assert!(!rendered.contains("{query}"));
    }
}
