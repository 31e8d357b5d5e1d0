//! # gguf-embed — text embeddings over a stable C ABI
//!
//! Loads GGUF models through llama.cpp and computes one embedding per call,
//! for hosts that cannot call llama.cpp directly. Nothing unwinds or throws
//! across the boundary: failures come back as a null handle or -1 plus a
//! per-thread error message.
//!
//! ## Architecture
//!
//! - **[`last_error`]** — per-thread last-error channel read by C callers
//! - **[`error`]** — `EmbedError` taxonomy and its numeric `ErrorKind`
//! - **[`engine`]** — inference engine traits, decode batch, mock engine and
//!   the llama.cpp engine (feature `llama`)
//! - **[`model`]** — model ids, handles and the registry that owns them
//! - **[`pipeline`]** — tokenize → batch → decode → extract → copy
//! - **[`bridge`]** — safe `Result` API over one engine
//! - **[`ffi`]** — panic-containing C boundary and `gguf_embed_*` exports
//! - **[`embedder`]** — `Embedder` trait and `EmbedClient`
//! - **[`config`]** — JSON configuration with defaults and env override

pub mod bridge;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod last_error;
pub mod model;
pub mod pipeline;

pub use bridge::Bridge;
pub use embedder::{EmbedClient, Embedder};
pub use error::{EmbedError, ErrorKind};
pub use model::ModelId;
