/// Inference engine capability used by the embedding pipeline.
///
/// The engine loads models, tokenizes, decodes and exposes the embedding
/// produced by a decode. Everything behind these traits is opaque to the rest
/// of the crate; resources it hands out release themselves on drop.
pub mod batch;
#[cfg(feature = "llama")]
pub mod llama;
pub mod mock;

use std::path::Path;

pub use batch::Batch;

/// Token identifier produced by a vocabulary.
pub type Token = i32;

/// Sequence id used for every position of a single-text batch.
pub const SEQ_ID: i32 = 0;

/// Overrides applied on top of the engine's default model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelParams {
    pub n_gpu_layers: i32,
}

/// Parameters for a per-call inference context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub embeddings: bool,
}

impl ContextParams {
    /// Context that can hold `n_ctx` tokens in one batch and produces embeddings.
    #[must_use]
    pub fn for_embeddings(n_ctx: u32) -> Self {
        Self {
            n_ctx,
            n_batch: n_ctx,
            embeddings: true,
        }
    }
}

/// Loads models. Implementations must be shareable across threads.
pub trait Engine: Send + Sync {
    type Model: LoadedModel;

    fn load_model(&self, path: &Path, params: &ModelParams) -> anyhow::Result<Self::Model>;
}

/// A loaded model. Dropping it releases the native resource.
///
/// `vocab` and `new_context` may be called from several threads at once.
pub trait LoadedModel: Send + Sync {
    type Vocab<'m>: Vocabulary
    where
        Self: 'm;
    type Context<'m>: InferenceContext
    where
        Self: 'm;

    fn vocab(&self) -> Option<Self::Vocab<'_>>;

    /// `None` when the engine could not create the context.
    fn new_context(&self, params: &ContextParams) -> Option<Self::Context<'_>>;

    /// Embedding dimensionality of the model.
    fn n_embd(&self) -> i32;

    /// Context length the model was trained with.
    fn n_ctx_train(&self) -> i32;
}

pub trait Vocabulary {
    /// Tokenize `text` into `tokens`.
    ///
    /// Returns the number of tokens the text produces, even when `tokens` is
    /// too short to hold them (only `tokens.len()` are written then), so an
    /// empty slice performs a sizing pass. A negative value means failure.
    fn tokenize(
        &self,
        text: &[u8],
        tokens: &mut [Token],
        add_special: bool,
        parse_special: bool,
    ) -> i32;
}

/// Execution state for one embed call. Dropping it releases the native context.
pub trait InferenceContext {
    /// Evaluate `batch`. Negative is an error; positive is a warning.
    fn decode(&mut self, batch: &Batch) -> i32;

    /// Embedding produced by the last successful decode, `None` if there is none.
    fn embeddings(&self) -> Option<&[f32]>;
}
