use anyhow::Context;
use clap::{Parser, Subcommand};
use quarry_embed::create_provider;
use quarry_retriever::config::QuarryConfig;
use quarry_retriever::error::QueryError;
use quarry_retriever::generation::{CompletionProvider, OllamaCompletionProvider};
use quarry_retriever::retrieval::{
    IndexBuilder, Orchestrator, PromptTemplate, RetrievedChunk, format_context,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Ask questions about a codebase using a locally built vector index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root of the corpus to index
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    /// Configuration file (defaults to <root>/quarry.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer a question using the most relevant code as context
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Number of chunks to retrieve (defaults to retrieval.top_k)
        #[arg(short)]
        k: Option<usize>,
    },
    /// Answer questions read line by line from stdin against one index
    Chat {
        #[arg(short)]
        k: Option<usize>,
    },
    /// Print the chunks nearest to a query
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[arg(short)]
        k: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Build or refresh the index and print the build report
    Index {
        /// Re-embed everything even if the corpus is unchanged
        #[arg(long)]
        force: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
    Context,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            "context" => Ok(OutputFormat::Context),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Stop a running build at the next batch boundary on Ctrl-C.
fn cancel_on_ctrl_c(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping after the current batch");
            flag.store(true, Ordering::SeqCst);
        }
    });
}

async fn make_builder(root: &Path, config: &QuarryConfig) -> anyhow::Result<IndexBuilder> {
    let provider = create_provider(&config.embedding)
        .await
        .context("cannot create embedding provider")?;
    let builder = IndexBuilder::new(root, config, provider)?;
    cancel_on_ctrl_c(builder.cancel_handle());
    Ok(builder)
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = QuarryConfig::load(&args.root, args.config.as_deref())?;

    match args.command {
        Commands::Index { force, json } => {
            let builder = make_builder(&args.root, &config).await?;
            let outcome = builder.build(force).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.report)?);
            } else {
                println!("{}", outcome.report);
            }
            if outcome.report.is_degraded() {
                anyhow::bail!("index build completed with errors");
            }
            Ok(())
        }
        Commands::Search { query, k, format } => {
            let query = query.join(" ");
            let k = k.unwrap_or(config.retrieval.top_k);
            let orchestrator = Orchestrator::new(make_builder(&args.root, &config).await?);
            let retrieved = orchestrator.retrieve(&query, k).await?;
            print_results(&retrieved, &format)?;
            Ok(())
        }
        Commands::Ask { query, k } => {
            let query = query.join(" ");
            let k = k.unwrap_or(config.retrieval.top_k);
            let (orchestrator, completion) = make_answerer(&args.root, &config).await?;
            answer(&orchestrator, &completion, &query, k).await
        }
        Commands::Chat { k } => {
            let k = k.unwrap_or(config.retrieval.top_k);
            let (orchestrator, completion) = make_answerer(&args.root, &config).await?;
            chat(&orchestrator, &completion, k).await
        }
    }
}

/// Orchestrator and completion provider for `ask` and `chat`.
async fn make_answerer(
    root: &Path,
    config: &QuarryConfig,
) -> anyhow::Result<(Orchestrator, OllamaCompletionProvider)> {
    let completion = OllamaCompletionProvider::new(&config.generation)?;
    if config.generation.check_model {
        completion.check_model().await.with_context(|| {
            format!(
                "Ollama is not ready; make sure it is running at {} and the model is pulled (`ollama pull {}`)",
                config.generation.base_url, config.generation.model
            )
        })?;
    }

    let template = config
        .generation
        .prompt_template
        .as_deref()
        .map(PromptTemplate::new)
        .unwrap_or_default();
    let orchestrator = Orchestrator::new(make_builder(root, config).await?)
        .with_template(template)
        .with_retries(config.generation.retries);
    Ok((orchestrator, completion))
}

async fn answer(
    orchestrator: &Orchestrator,
    completion: &dyn CompletionProvider,
    query: &str,
    k: usize,
) -> anyhow::Result<()> {
    match orchestrator.answer(completion, query, k).await {
        Ok(answer) => {
            println!("{}", answer.response);
            Ok(())
        }
        Err(QueryError::NoContext) => {
            anyhow::bail!("No relevant code found for '{query}'")
        }
        Err(QueryError::Generation { source, retrieved }) => {
            // Degraded answer: show what was found, then fail.
            println!("{}", format_context(&retrieved));
            Err(QueryError::Generation {
                source,
                retrieved: Vec::new(),
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Read questions until EOF or `exit`. A failed question is reported and the
/// loop continues; the index is built once, on the first question.
async fn chat(
    orchestrator: &Orchestrator,
    completion: &dyn CompletionProvider,
    k: usize,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("quarry> ");
        let Some(line) = lines.next_line().await.context("cannot read from stdin")? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" || query == "quit" {
            break;
        }
        if let Err(e) = answer(orchestrator, completion, query, k).await {
            eprintln!("Error: {e:#}");
        }
    }
    eprintln!();
    Ok(())
}

fn print_results(retrieved: &[RetrievedChunk], format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(retrieved)?);
        }
        OutputFormat::Context => {
            print!("{}", format_context(retrieved));
        }
        OutputFormat::Summary => {
            println!("Found {} chunks:", retrieved.len());
            for (rank, hit) in retrieved.iter().enumerate() {
                let metadata = &hit.chunk.metadata;
                let first_line = hit.chunk.text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                println!(
                    "  {:>2}. {:.4} | {} [{}] #{} | {}",
                    rank + 1,
                    hit.distance,
                    metadata.path,
                    metadata.language,
                    hit.chunk.sequence,
                    first_line.trim()
                );
            }
        }
    }
    Ok(())
}
