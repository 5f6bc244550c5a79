use clap::Parser;
use quarry_context::{LanguageTable, TEXT_LANGUAGE, TextChunk, TextSplitter};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Chunk a single file the way the indexer would and print the chunks as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Path reported for the chunks. Defaults to the input path.
    #[arg(short, long)]
    path: Option<String>,

    /// Maximum chunk length in characters.
    #[arg(short = 's', long, default_value_t = 500)]
    chunk_size: usize,

    /// Characters repeated from the previous chunk.
    #[arg(short, long, default_value_t = 0)]
    overlap: usize,

    /// Extension used to pick the splitting rules, e.g. `py`.
    /// Defaults to the extension of the reported path.
    #[arg(short, long)]
    extension: Option<String>,

    /// Comma-separated regex delimiters, overriding the language's own.
    #[arg(short, long, value_delimiter = ',')]
    delimiters: Option<Vec<String>>,
}

#[derive(Serialize)]
struct Output<'a> {
    language: &'a str,
    chunks: Vec<TextChunk>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let content = match &args.input {
        Some(input) => fs::read_to_string(input)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let path = args
        .path
        .clone()
        .or_else(|| args.input.clone())
        .unwrap_or_else(|| "stdin".to_string());

    let extension = args.extension.clone().or_else(|| {
        Path::new(&path)
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
    });

    let table = LanguageTable::builtin();
    let language = extension
        .as_deref()
        .and_then(|ext| table.language_for(ext))
        .unwrap_or(TEXT_LANGUAGE);

    let patterns: Vec<&str> = match &args.delimiters {
        Some(custom) => custom.iter().map(String::as_str).collect(),
        None => table.delimiters_for(language),
    };

    let splitter = TextSplitter::for_language(language, &patterns, args.chunk_size, args.overlap)?;
    let output = Output {
        language,
        chunks: splitter.split(&path, &content),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
