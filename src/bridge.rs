/// Safe, `Result`-returning API over one engine and its loaded models.
///
/// This is what Rust callers use directly. The C boundary in [`crate::ffi`]
/// wraps the same methods and turns their errors into sentinels plus a
/// thread-local message.
use std::path::PathBuf;

use tracing::{debug, info};

use crate::engine::{Engine, LoadedModel, ModelParams};
use crate::error::{EmbedError, Result};
use crate::model::{ModelId, ModelRegistry};
use crate::pipeline;

pub struct Bridge<E: Engine> {
    engine: E,
    models: ModelRegistry<E::Model>,
}

impl<E: Engine> Bridge<E> {
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            models: ModelRegistry::new(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Load a model file and register it.
    ///
    /// `n_ctx` sizes every embedding context created for this model; 0 picks
    /// a size from the model (see [`pipeline::embed`]).
    pub fn load_model(&self, path: &str, n_ctx: i32, n_gpu_layers: i32) -> Result<ModelId> {
        if path.is_empty() {
            return Err(EmbedError::invalid("model_path is empty"));
        }
        let n_ctx = u32::try_from(n_ctx)
            .map_err(|_| EmbedError::invalid(format!("n_ctx must not be negative, got {n_ctx}")))?;

        let path = PathBuf::from(path);
        let params = ModelParams { n_gpu_layers };
        let model = self.engine.load_model(&path, &params).map_err(|e| {
            EmbedError::ResourceUnavailable(format!("failed to load model {}: {e:#}", path.display()))
        })?;

        let n_embd = model.n_embd();
        let id = self
            .models
            .insert(model, n_ctx, path.clone())
            .ok_or_else(|| EmbedError::ResourceUnavailable("model handle space exhausted".to_string()))?;

        info!(
            model_id = id.get(),
            n_embd,
            n_ctx,
            n_gpu_layers,
            "Loaded model {}",
            path.display()
        );
        Ok(id)
    }

    /// Free a model. Unknown or already-freed ids are ignored.
    pub fn free_model(&self, id: ModelId) -> bool {
        let freed = self.models.remove(id);
        if freed {
            info!(model_id = id.get(), "Freed model");
        } else {
            debug!(model_id = id.get(), "Ignoring free of unknown model");
        }
        freed
    }

    /// Embed `text` into `out`, returning the model's true dimensionality.
    pub fn embed(&self, id: ModelId, text: &str, out: &mut [f32]) -> Result<usize> {
        self.embed_bytes(id, text.as_bytes(), out)
    }

    /// Like [`Self::embed`] for text that is not guaranteed to be UTF-8.
    pub fn embed_bytes(&self, id: ModelId, text: &[u8], out: &mut [f32]) -> Result<usize> {
        let handle = self
            .models
            .get(id)
            .ok_or_else(|| EmbedError::invalid("model handle is not live"))?;
        pipeline::embed(handle.model(), handle.n_ctx(), text, out)
    }

    /// Embedding dimensionality of a live model.
    pub fn dimensions(&self, id: ModelId) -> Result<usize> {
        let handle = self
            .models
            .get(id)
            .ok_or_else(|| EmbedError::invalid("model handle is not live"))?;
        usize::try_from(handle.model().n_embd())
            .map_err(|_| EmbedError::EmbeddingUnavailable("negative embedding size".to_string()))
    }

    /// Path a live model was loaded from.
    #[must_use]
    pub fn model_path(&self, id: ModelId) -> Option<PathBuf> {
        self.models.get(id).map(|h| h.path().to_path_buf())
    }

    #[must_use]
    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}
