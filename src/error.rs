/// Error taxonomy shared by the pipeline, the handle registry and the C boundary.
use std::os::raw::c_int;

use thiserror::Error;

/// Every way a load or embed call can fail.
///
/// None of these ever cross the C boundary as a Rust error: the boundary turns
/// them into a sentinel return value plus a thread-local message.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("invalid parameters: {0}")]
    InvalidArgument(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("tokenization failed: {0}")]
    TokenizationFailure(String),

    #[error("decode failed with status {0}")]
    DecodeFailure(i32),

    #[error("failed to get embeddings: {0}")]
    EmbeddingUnavailable(String),

    #[error("internal fault during {operation}: {message}")]
    InternalFault {
        operation: &'static str,
        message: String,
    },
}

/// Numeric error class exposed to C callers next to the message.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// No error recorded on this thread yet.
    #[default]
    None = 0,
    InvalidArgument = 1,
    ResourceUnavailable = 2,
    TokenizationFailure = 3,
    DecodeFailure = 4,
    EmbeddingUnavailable = 5,
    InternalFault = 6,
}

impl EmbedError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            Self::TokenizationFailure(_) => ErrorKind::TokenizationFailure,
            Self::DecodeFailure(_) => ErrorKind::DecodeFailure,
            Self::EmbeddingUnavailable(_) => ErrorKind::EmbeddingUnavailable,
            Self::InternalFault { .. } => ErrorKind::InternalFault,
        }
    }
}

impl ErrorKind {
    #[must_use]
    pub fn code(self) -> c_int {
        self as c_int
    }
}

pub type Result<T> = std::result::Result<T, EmbedError>;
