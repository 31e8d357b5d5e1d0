use anyhow::{Context, Result};
use clap::Parser;
use gguf_embed::config::Config;
use gguf_embed::engine::llama::LlamaEngine;
use gguf_embed::{EmbedClient, Embedder};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Compute text embeddings with a local GGUF model.
#[derive(Parser, Debug)]
#[command(name = "gguf-embed", version)]
struct Cli {
    /// JSON config file
    #[arg(long, default_value = gguf_embed::config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Model path (overrides config and GGUF_EMBED_MODEL)
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    n_ctx: Option<i32>,

    #[arg(long)]
    n_gpu_layers: Option<i32>,

    /// L2-normalize the output vectors
    #[arg(long)]
    normalize: bool,

    /// Texts to embed
    #[arg(required = true)]
    texts: Vec<String>,
}

#[derive(Serialize)]
struct Output<'a> {
    text: &'a str,
    dimensions: usize,
    embedding: Vec<f32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 1. Load config
    let mut config = Config::load(&cli.config)?
        .with_env()
        .with_model_override(cli.model);
    if let Some(n_ctx) = cli.n_ctx {
        config.model.n_ctx = n_ctx;
    }
    if let Some(n_gpu_layers) = cli.n_gpu_layers {
        config.model.n_gpu_layers = n_gpu_layers;
    }
    config.model.normalize |= cli.normalize;
    config.validate()?;

    // 2. Load model
    let client = EmbedClient::open(LlamaEngine::new(), &config.model)
        .with_context(|| format!("failed to open model {}", config.model.path))?;

    // 3. Embed
    for text in &cli.texts {
        let embedding = client.embed(text)?;
        let line = serde_json::to_string(&Output {
            text,
            dimensions: embedding.len(),
            embedding,
        })?;
        println!("{line}");
    }

    Ok(())
}
