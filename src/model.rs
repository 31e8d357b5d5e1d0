/// Loaded-model handles and the registry that owns them.
///
/// Callers only ever see a [`ModelId`]. The registry holds the single owning
/// reference to each [`ModelHandle`]; embed calls borrow a clone of it for
/// their duration, so freeing a model while an embed is running defers the
/// native release to the end of that embed instead of pulling the model out
/// from under it.
use std::collections::HashMap;
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::engine::LoadedModel;

/// Opaque, never-reused identifier of a live model. Zero is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(NonZeroUsize);

impl ModelId {
    #[must_use]
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Encode as the opaque pointer handed to C callers.
    #[must_use]
    pub fn into_raw(self) -> *mut c_void {
        ptr::without_provenance_mut(self.0.get())
    }

    /// Decode a C handle; the null pointer yields `None`.
    #[must_use]
    pub fn from_raw(handle: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(handle.addr()).map(Self)
    }
}

/// One loaded model plus the settings chosen when it was loaded.
pub struct ModelHandle<M> {
    id: ModelId,
    model: M,
    n_ctx: u32,
    path: PathBuf,
}

impl<M: LoadedModel> ModelHandle<M> {
    #[must_use]
    pub fn id(&self) -> ModelId {
        self.id
    }

    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Context size requested at load time, 0 for the model's own.
    #[must_use]
    pub fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct ModelRegistry<M> {
    next_id: AtomicUsize,
    live: RwLock<HashMap<ModelId, Arc<ModelHandle<M>>>>,
}

impl<M: LoadedModel> ModelRegistry<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Take ownership of `model` and return its new id.
    ///
    /// Returns `None` only when the id space is exhausted; the model is
    /// dropped in that case.
    pub fn insert(&self, model: M, n_ctx: u32, path: PathBuf) -> Option<ModelId> {
        let id = ModelId(NonZeroUsize::new(self.next_id.fetch_add(1, Ordering::Relaxed))?);
        let handle = Arc::new(ModelHandle {
            id,
            model,
            n_ctx,
            path,
        });
        self.live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        Some(id)
    }

    /// Shared reference to a live model, `None` if the id is unknown or freed.
    #[must_use]
    pub fn get(&self, id: ModelId) -> Option<Arc<ModelHandle<M>>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Remove a model. Returns `false` if it was not live.
    ///
    /// The native model is dropped here unless an embed call still holds it.
    pub fn remove(&self, id: ModelId) -> bool {
        let removed = self
            .live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        match removed {
            Some(handle) => {
                if Arc::strong_count(&handle) > 1 {
                    debug!(
                        model_id = id.get(),
                        "Model still in use, release deferred to in-flight embed"
                    );
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: LoadedModel> Default for ModelRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
