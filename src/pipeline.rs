//! Embedding pipeline: tokenize, batch, decode, extract, copy.
//!
//! One call owns one context, one token buffer and one batch. All three are
//! scoped values, so every early return (and any unwind out of the engine)
//! releases whatever was acquired up to that point.

use tracing::{debug, warn};

use crate::engine::{Batch, ContextParams, InferenceContext, LoadedModel, Token, Vocabulary};
use crate::error::{EmbedError, Result};

/// Context size used when the caller asks for the model's own and the model
/// does not report a training context.
pub const DEFAULT_N_CTX: u32 = 512;

/// Upper bound on a context size picked automatically. Batch buffers are
/// sized to the context, so long-context models would otherwise allocate a
/// huge compute buffer on every call.
pub const MAX_AUTO_N_CTX: u32 = 8192;

/// Embed `text` with `model` and copy the result into `out`.
///
/// `n_ctx` is the per-call context size; 0 uses the model's training context
/// capped at [`MAX_AUTO_N_CTX`], or [`DEFAULT_N_CTX`] when the model does not
/// report one.
/// Writes `min(n_embd, out.len())` values and returns `n_embd`, which may be
/// larger than `out.len()`. Values past `n_embd` in `out` are left untouched.
pub fn embed<M: LoadedModel>(model: &M, n_ctx: u32, text: &[u8], out: &mut [f32]) -> Result<usize> {
    if out.is_empty() {
        return Err(EmbedError::invalid("output buffer must hold at least one value"));
    }

    let vocab = model
        .vocab()
        .ok_or_else(|| EmbedError::ResourceUnavailable("failed to get vocab".to_string()))?;

    let n_ctx = effective_n_ctx(model, n_ctx);
    let mut ctx = model
        .new_context(&ContextParams::for_embeddings(n_ctx))
        .ok_or_else(|| EmbedError::ResourceUnavailable("failed to create context".to_string()))?;

    let tokens = tokenize(&vocab, text)?;
    if tokens.len() > n_ctx as usize {
        return Err(EmbedError::invalid(format!(
            "input is {} tokens but the context holds {n_ctx}",
            tokens.len()
        )));
    }

    let status = {
        let batch = Batch::for_sequence(&tokens);
        ctx.decode(&batch)
    };
    if status < 0 {
        return Err(EmbedError::DecodeFailure(status));
    }
    if status > 0 {
        warn!(status, "decode returned a warning status");
    }

    let n_embd = usize::try_from(model.n_embd())
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            EmbedError::EmbeddingUnavailable(format!(
                "model reports {} embedding dimensions",
                model.n_embd()
            ))
        })?;

    let embedding = ctx
        .embeddings()
        .ok_or_else(|| EmbedError::EmbeddingUnavailable("no embedding buffer after decode".to_string()))?;
    if embedding.len() < n_embd {
        return Err(EmbedError::EmbeddingUnavailable(format!(
            "embedding buffer holds {} values, model reports {n_embd}",
            embedding.len()
        )));
    }

    let copy_len = n_embd.min(out.len());
    out[..copy_len].copy_from_slice(&embedding[..copy_len]);

    debug!(
        n_tokens = tokens.len(),
        n_embd,
        written = copy_len,
        "Computed embedding"
    );
    Ok(n_embd)
}

/// Two-pass tokenization: size, then fill a buffer of exactly that size.
///
/// Adds the beginning-of-sequence marker, does not parse special tokens.
pub fn tokenize<V: Vocabulary>(vocab: &V, text: &[u8]) -> Result<Vec<Token>> {
    let n = vocab.tokenize(text, &mut [], true, false);
    let n = usize::try_from(n)
        .map_err(|_| EmbedError::TokenizationFailure(format!("sizing pass returned {n}")))?;
    if n == 0 {
        return Err(EmbedError::TokenizationFailure("text produced no tokens".to_string()));
    }

    let mut tokens = vec![0; n];
    let filled = vocab.tokenize(text, &mut tokens, true, false);
    if usize::try_from(filled).ok() != Some(n) {
        return Err(EmbedError::TokenizationFailure(format!(
            "fill pass returned {filled}, expected {n}"
        )));
    }
    Ok(tokens)
}

fn effective_n_ctx<M: LoadedModel>(model: &M, requested: u32) -> u32 {
    if requested > 0 {
        return requested;
    }
    match u32::try_from(model.n_ctx_train()) {
        Ok(n) if n > 0 => n.min(MAX_AUTO_N_CTX),
        _ => DEFAULT_N_CTX,
    }
}
