/// llama.cpp engine using the raw `llama-cpp-sys-2` bindings.
///
/// Loads GGUF models, creates one embedding context per call, and wraps each
/// native resource (model, context, batch) in a guard that frees it on drop.
/// llama.cpp log output is forwarded into `tracing`.
use std::ffi::{CStr, CString, c_void};
use std::marker::PhantomData;
use std::os::raw::c_char;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::Once;

use anyhow::{Context as _, Result, anyhow};
use llama_cpp_sys_2 as sys;
use tracing::{debug, error, info, trace, warn};

use super::{Batch, ContextParams, Engine, InferenceContext, LoadedModel, ModelParams, Token, Vocabulary};

static BACKEND_INIT: Once = Once::new();

/// Handle to the process-wide llama.cpp backend.
pub struct LlamaEngine {
    _backend: (),
}

impl LlamaEngine {
    /// Initialize the llama.cpp backend. Safe to call multiple times.
    #[must_use]
    pub fn new() -> Self {
        BACKEND_INIT.call_once(|| unsafe {
            sys::llama_log_set(Some(forward_log), ptr::null_mut());
            sys::llama_backend_init();
        });
        Self { _backend: () }
    }
}

impl Default for LlamaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for LlamaEngine {
    type Model = LlamaModel;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<LlamaModel> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("model path is not valid UTF-8: {}", path.display()))?;
        let c_path = CString::new(path_str).context("model path contains a NUL byte")?;

        info!("Loading GGUF model: {}", path.display());

        // SAFETY: default params are plain data; the path outlives the call.
        let raw = unsafe {
            let mut model_params = sys::llama_model_default_params();
            model_params.n_gpu_layers = params.n_gpu_layers;
            sys::llama_model_load_from_file(c_path.as_ptr(), model_params)
        };

        let ptr = NonNull::new(raw).ok_or_else(|| anyhow!("failed to load model"))?;
        let model = LlamaModel { ptr };

        info!(
            n_embd = model.n_embd(),
            n_ctx_train = model.n_ctx_train(),
            "GGUF model loaded"
        );
        Ok(model)
    }
}

/// Owned `llama_model`, freed on drop.
pub struct LlamaModel {
    ptr: NonNull<sys::llama_model>,
}

// SAFETY: a llama_model is read-only after loading; llama.cpp supports many
// contexts over one model from different threads. The pointer is freed only
// in Drop, which requires exclusive ownership.
unsafe impl Send for LlamaModel {}
unsafe impl Sync for LlamaModel {}

impl Drop for LlamaModel {
    fn drop(&mut self) {
        debug!("Freeing GGUF model");
        unsafe { sys::llama_model_free(self.ptr.as_ptr()) };
    }
}

impl LoadedModel for LlamaModel {
    type Vocab<'m> = LlamaVocab<'m>;
    type Context<'m> = LlamaContext<'m>;

    fn vocab(&self) -> Option<LlamaVocab<'_>> {
        let raw = unsafe { sys::llama_model_get_vocab(self.ptr.as_ptr()) };
        NonNull::new(raw.cast_mut()).map(|ptr| LlamaVocab {
            ptr,
            _model: PhantomData,
        })
    }

    fn new_context(&self, params: &ContextParams) -> Option<LlamaContext<'_>> {
        // SAFETY: the model pointer is live for 'self and the context guard
        // cannot outlive it.
        let raw = unsafe {
            let mut ctx_params = sys::llama_context_default_params();
            ctx_params.embeddings = params.embeddings;
            ctx_params.n_ctx = params.n_ctx;
            ctx_params.n_batch = params.n_batch;
            ctx_params.n_ubatch = params.n_batch;
            sys::llama_init_from_model(self.ptr.as_ptr(), ctx_params)
        };
        NonNull::new(raw).map(|ptr| LlamaContext {
            ptr,
            n_embd: usize::try_from(self.n_embd()).unwrap_or(0),
            _model: PhantomData,
        })
    }

    fn n_embd(&self) -> i32 {
        unsafe { sys::llama_model_n_embd(self.ptr.as_ptr()) }
    }

    fn n_ctx_train(&self) -> i32 {
        unsafe { sys::llama_model_n_ctx_train(self.ptr.as_ptr()) }
    }
}

/// Vocabulary borrowed from a loaded model.
pub struct LlamaVocab<'m> {
    ptr: NonNull<sys::llama_vocab>,
    _model: PhantomData<&'m LlamaModel>,
}

impl Vocabulary for LlamaVocab<'_> {
    fn tokenize(
        &self,
        text: &[u8],
        tokens: &mut [Token],
        add_special: bool,
        parse_special: bool,
    ) -> i32 {
        let Ok(text_len) = i32::try_from(text.len()) else {
            return -1;
        };
        let capacity = i32::try_from(tokens.len()).unwrap_or(i32::MAX);

        let n = unsafe {
            sys::llama_tokenize(
                self.ptr.as_ptr(),
                text.as_ptr().cast::<c_char>(),
                text_len,
                tokens.as_mut_ptr(),
                capacity,
                add_special,
                parse_special,
            )
        };

        // llama.cpp reports "buffer too small" as the negated required count
        // and overflow as i32::MIN.
        match n {
            i32::MIN => -1,
            n if n < 0 => -n,
            n => n,
        }
    }
}

/// Per-call `llama_context`, freed on drop.
pub struct LlamaContext<'m> {
    ptr: NonNull<sys::llama_context>,
    n_embd: usize,
    _model: PhantomData<&'m LlamaModel>,
}

impl Drop for LlamaContext<'_> {
    fn drop(&mut self) {
        unsafe { sys::llama_free(self.ptr.as_ptr()) };
    }
}

impl InferenceContext for LlamaContext<'_> {
    fn decode(&mut self, batch: &Batch) -> i32 {
        let Ok(n_tokens) = i32::try_from(batch.len()) else {
            return -1;
        };
        let mut native = NativeBatch::new(n_tokens);
        native.fill(batch);
        unsafe { sys::llama_decode(self.ptr.as_ptr(), native.raw) }
    }

    fn embeddings(&self) -> Option<&[f32]> {
        let ctx = self.ptr.as_ptr();
        let raw = unsafe {
            match EmbeddingSource::for_pooling(sys::llama_pooling_type(ctx)) {
                EmbeddingSource::OutputRow => sys::llama_get_embeddings(ctx),
                EmbeddingSource::Sequence => sys::llama_get_embeddings_seq(ctx, super::SEQ_ID),
                EmbeddingSource::Unsupported => {
                    warn!("rank pooling does not produce embeddings");
                    return None;
                }
            }
        };
        if raw.is_null() || self.n_embd == 0 {
            return None;
        }
        // SAFETY: both readable sources hold n_embd floats at `raw` until the
        // next decode or until the context is freed, both of which need
        // &mut self.
        Some(unsafe { std::slice::from_raw_parts(raw, self.n_embd) })
    }
}

/// Where a context keeps the embedding for its single sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbeddingSource {
    /// No pooling: the row of the one output position.
    OutputRow,
    /// Pooled: one `n_embd` vector per sequence.
    Sequence,
    /// Rank pooling stores `n_cls_out` scores per sequence, not an embedding.
    Unsupported,
}

impl EmbeddingSource {
    fn for_pooling(pooling: sys::llama_pooling_type) -> Self {
        match pooling {
            sys::LLAMA_POOLING_TYPE_NONE => Self::OutputRow,
            sys::LLAMA_POOLING_TYPE_RANK => Self::Unsupported,
            _ => Self::Sequence,
        }
    }
}

/// `llama_batch` allocated by llama.cpp, freed on drop.
struct NativeBatch {
    raw: sys::llama_batch,
    capacity: usize,
}

impl NativeBatch {
    fn new(n_tokens: i32) -> Self {
        let raw = unsafe { sys::llama_batch_init(n_tokens, 0, 1) };
        Self {
            raw,
            capacity: usize::try_from(n_tokens).unwrap_or(0),
        }
    }

    fn fill(&mut self, batch: &Batch) {
        let n = batch.len().min(self.capacity);
        // SAFETY: llama_batch_init allocated `capacity` slots in every array
        // and one seq id per slot.
        unsafe {
            for i in 0..n {
                *self.raw.token.add(i) = batch.tokens()[i];
                *self.raw.pos.add(i) = batch.positions()[i];
                *self.raw.n_seq_id.add(i) = 1;
                *(*self.raw.seq_id.add(i)) = batch.seq_ids()[i];
                *self.raw.logits.add(i) = i8::from(batch.outputs()[i]);
            }
        }
        self.raw.n_tokens = n as i32;
    }
}

impl Drop for NativeBatch {
    fn drop(&mut self) {
        unsafe { sys::llama_batch_free(self.raw) };
    }
}

unsafe extern "C" fn forward_log(level: sys::ggml_log_level, text: *const c_char, _user: *mut c_void) {
    if text.is_null() {
        return;
    }
    let msg = unsafe { CStr::from_ptr(text) }.to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() {
        return;
    }
    match level {
        sys::GGML_LOG_LEVEL_ERROR => error!(target: "llama.cpp", "{msg}"),
        sys::GGML_LOG_LEVEL_WARN => warn!(target: "llama.cpp", "{msg}"),
        sys::GGML_LOG_LEVEL_INFO => debug!(target: "llama.cpp", "{msg}"),
        _ => trace!(target: "llama.cpp", "{msg}"),
    }
}
