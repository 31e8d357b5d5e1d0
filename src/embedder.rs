/// Embedder trait and a client that owns one loaded model.
///
/// `EmbedClient` is the convenient Rust-side way to use a model: it checks the
/// model file, loads it, learns the embedding size with a one-value probe and
/// then hands out owned vectors of exactly that size.
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::config::ModelConfig;
use crate::engine::Engine;
use crate::error::{EmbedError, Result};
use crate::model::ModelId;

const PROBE_TEXT: &str = "test";

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed multiple text strings into vectors.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

pub struct EmbedClient<E: Engine> {
    bridge: Arc<Bridge<E>>,
    model: ModelId,
    dimensions: usize,
    normalize: bool,
}

impl<E: Engine> EmbedClient<E> {
    /// Load the configured model with a dedicated engine.
    pub fn open(engine: E, config: &ModelConfig) -> Result<Self> {
        Self::with_bridge(Arc::new(Bridge::new(engine)), config)
    }

    /// Load the configured model into a shared bridge.
    pub fn with_bridge(bridge: Arc<Bridge<E>>, config: &ModelConfig) -> Result<Self> {
        check_model_file(Path::new(&config.path))?;

        let model = bridge.load_model(&config.path, config.n_ctx, config.n_gpu_layers)?;

        // Only the returned size matters; one value of buffer is enough.
        let mut probe = [0.0f32; 1];
        let dimensions = match bridge.embed(model, PROBE_TEXT, &mut probe) {
            Ok(n) if n > 0 => n,
            Ok(_) => {
                bridge.free_model(model);
                return Err(EmbedError::EmbeddingUnavailable(
                    "probe embedding returned no dimensions".to_string(),
                ));
            }
            Err(e) => {
                bridge.free_model(model);
                return Err(e);
            }
        };

        info!(
            "Embedding model ready: {} ({} dimensions)",
            config.path, dimensions
        );

        Ok(Self {
            bridge,
            model,
            dimensions,
            normalize: config.normalize,
        })
    }

    #[must_use]
    pub fn model_id(&self) -> ModelId {
        self.model
    }
}

impl<E: Engine> Embedder for EmbedClient<E> {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dimensions];
        let n = self.bridge.embed(self.model, text, &mut embedding)?;
        if n != self.dimensions {
            warn!(
                expected = self.dimensions,
                got = n,
                "Embedding size changed since probe"
            );
            embedding.resize(n, 0.0);
            if n > self.dimensions {
                self.bridge.embed(self.model, text, &mut embedding)?;
            }
        }

        if self.normalize {
            l2_normalize(&mut embedding);
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl<E: Engine> Drop for EmbedClient<E> {
    fn drop(&mut self) {
        self.bridge.free_model(self.model);
    }
}

fn check_model_file(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| {
        EmbedError::ResourceUnavailable(format!("model file not found: {}: {e}", path.display()))
    })?;
    if meta.len() == 0 {
        return Err(EmbedError::ResourceUnavailable(format!(
            "model file is empty: {}",
            path.display()
        )));
    }
    Ok(())
}

/// L2-normalize a vector in place. Zero vectors are left as they are.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return;
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    for v in vec.iter_mut() {
        *v *= inv_norm;
    }
}
