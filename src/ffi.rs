//! C boundary.
//!
//! Every entry point validates its raw arguments, runs under [`guard`] so a
//! panic anywhere below becomes an `InternalFault` instead of unwinding into
//! the caller, and reports failure as a sentinel (null handle or -1) with the
//! message stored in the calling thread's error channel.
//!
//! The exported `gguf_embed_*` symbols (feature `llama`) serve a process-wide
//! [`Bridge`] over llama.cpp. See `include/gguf_embed.h`.

use std::any::Any;
use std::ffi::{CStr, c_void};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use tracing::warn;

use crate::bridge::Bridge;
use crate::engine::Engine;
use crate::error::{EmbedError, Result};
use crate::last_error::set_last_error;
use crate::model::ModelId;

/// Run `f`, converting a panic into [`EmbedError::InternalFault`].
pub fn guard<T>(operation: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(EmbedError::InternalFault {
            operation,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn record(operation: &str, err: &EmbedError) {
    warn!(operation, kind = ?err.kind(), "{err}");
    set_last_error(err);
}

impl<E: Engine> Bridge<E> {
    /// C form of [`Bridge::load_model`]. Returns null on failure.
    ///
    /// # Safety
    ///
    /// `path` must be null or point to a NUL-terminated string.
    pub unsafe fn load_raw(&self, path: *const c_char, n_ctx: c_int, n_gpu_layers: c_int) -> *mut c_void {
        let result = guard("model load", || {
            if path.is_null() {
                return Err(EmbedError::invalid("model_path is NULL"));
            }
            let path = unsafe { CStr::from_ptr(path) }
                .to_str()
                .map_err(|_| EmbedError::invalid("model_path is not valid UTF-8"))?;
            self.load_model(path, n_ctx, n_gpu_layers)
        });

        match result {
            Ok(id) => id.into_raw(),
            Err(err) => {
                record("load", &err);
                ptr::null_mut()
            }
        }
    }

    /// C form of [`Bridge::free_model`]. Null and stale handles are ignored.
    pub fn free_raw(&self, handle: *mut c_void) {
        let Some(id) = ModelId::from_raw(handle) else {
            return;
        };
        if let Err(err) = guard("model free", || Ok(self.free_model(id))) {
            record("free", &err);
        }
    }

    /// C form of [`Bridge::embed_bytes`]. Returns the model's embedding size
    /// or -1.
    ///
    /// # Safety
    ///
    /// `text` must be null or NUL-terminated; `out` must be null or valid for
    /// writes of `max_dims` floats.
    pub unsafe fn embed_raw(
        &self,
        handle: *mut c_void,
        text: *const c_char,
        out: *mut f32,
        max_dims: c_int,
    ) -> c_int {
        let result = guard("embedding", || {
            let id = ModelId::from_raw(handle).ok_or_else(|| EmbedError::invalid("model handle is NULL"))?;
            if text.is_null() {
                return Err(EmbedError::invalid("text is NULL"));
            }
            if out.is_null() {
                return Err(EmbedError::invalid("output buffer is NULL"));
            }
            let max_dims = usize::try_from(max_dims)
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| EmbedError::invalid(format!("max_dims must be positive, got {max_dims}")))?;

            let text = unsafe { CStr::from_ptr(text) }.to_bytes();
            let out = unsafe { std::slice::from_raw_parts_mut(out, max_dims) };
            let n_embd = self.embed_bytes(id, text, out)?;
            c_int::try_from(n_embd).map_err(|_| EmbedError::InternalFault {
                operation: "embedding",
                message: format!("embedding size {n_embd} does not fit the return type"),
            })
        });

        result.unwrap_or_else(|err| {
            record("embed", &err);
            -1
        })
    }
}

#[cfg(feature = "llama")]
mod exports {
    use std::ffi::c_void;
    use std::os::raw::{c_char, c_int};
    use std::sync::LazyLock;

    use crate::bridge::Bridge;
    use crate::engine::llama::LlamaEngine;
    use crate::last_error::{last_error_kind, last_error_ptr};

    static BRIDGE: LazyLock<Bridge<LlamaEngine>> = LazyLock::new(|| Bridge::new(LlamaEngine::new()));

    /// Load a GGUF model. Returns NULL on error; see `gguf_embed_last_error`.
    ///
    /// # Safety
    ///
    /// `model_path` must be NULL or a NUL-terminated string.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn gguf_embed_load_model(
        model_path: *const c_char,
        n_ctx: c_int,
        n_gpu_layers: c_int,
    ) -> *mut c_void {
        unsafe { BRIDGE.load_raw(model_path, n_ctx, n_gpu_layers) }
    }

    /// Free a model handle. NULL and already-freed handles are ignored.
    #[unsafe(no_mangle)]
    pub extern "C" fn gguf_embed_free_model(model: *mut c_void) {
        BRIDGE.free_raw(model);
    }

    /// Embed `text` into `embedding`. Returns the model's embedding size, which
    /// may exceed `max_dims`, or -1 on error.
    ///
    /// # Safety
    ///
    /// `text` must be NUL-terminated; `embedding` must hold `max_dims` floats.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn gguf_embed_embed(
        model: *mut c_void,
        text: *const c_char,
        embedding: *mut f32,
        max_dims: c_int,
    ) -> c_int {
        unsafe { BRIDGE.embed_raw(model, text, embedding, max_dims) }
    }

    /// Last error message of the calling thread. Valid until the next failing
    /// call on this thread.
    #[unsafe(no_mangle)]
    pub extern "C" fn gguf_embed_last_error() -> *const c_char {
        last_error_ptr()
    }

    /// Numeric class of the calling thread's last error, 0 if none.
    #[unsafe(no_mangle)]
    pub extern "C" fn gguf_embed_last_error_kind() -> c_int {
        last_error_kind().code()
    }
}
