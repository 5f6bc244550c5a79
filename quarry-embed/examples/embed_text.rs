//! Embed a few sentences with the provider chosen on the command line.
//!
//! cargo run -p quarry-embed --example embed_text -- [ollama|fastembed|hashed]

use quarry_embed::{EmbedBackend, EmbedConfig, create_provider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let backend: EmbedBackend = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "hashed".to_string())
        .parse()?;
    let config = EmbedConfig {
        provider: backend,
        ..EmbedConfig::default()
    };

    let provider = create_provider(&config).await?;
    println!(
        "Provider: {} ({})",
        provider.provider_name(),
        provider.model_id()
    );
    println!("Dimension: {}", provider.probe_dimension().await?);

    let texts = vec![
        "Rust is a systems programming language.".to_string(),
        "def walk(root): return os.listdir(root)".to_string(),
        "Machine learning models process natural language.".to_string(),
    ];
    let result = provider.embed_texts(&texts).await?;

    for (text, embedding) in texts.iter().zip(result.embeddings.iter()) {
        println!(
            "{:<50} {:?}",
            text,
            &embedding[..3.min(embedding.len())]
        );
    }
    Ok(())
}
