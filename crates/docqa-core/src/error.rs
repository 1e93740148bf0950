//! Error taxonomy for the docqa core.
//!
//! Every fallible core operation returns [`CoreError`]. Each variant maps to
//! a stable [`ErrorKind`] whose string form (`invalid_input`, `not_found`,
//! `storage_error`, …) is what transport layers expose to clients.
//!
//! Best-effort steps (message logging, memory persistence, pruning,
//! summarization, query logs) never surface a `CoreError` to the caller of
//! a turn; they are logged and skipped instead.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Boxed source error carried by adapter failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for core operations and collaborator traits.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The request failed validation (empty query, empty upload, oversize file).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No owner context was supplied.
    #[error("unauthorized: missing owner context")]
    Unauthorized,

    /// A session or document does not exist, or belongs to another owner.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Persistence or blob storage failure.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The embedding collaborator failed or returned malformed vectors.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The language-model collaborator failed.
    #[error("llm error: {0}")]
    Llm(String),

    /// A deadline expired while `step` was in flight.
    #[error("{step} timed out after {elapsed:?}")]
    Timeout { step: &'static str, elapsed: Duration },

    /// The caller cancelled the request while `step` was in flight.
    #[error("{step} cancelled")]
    Cancelled { step: &'static str },

    /// Misconfigured collaborator (missing credentials, unknown provider).
    #[error("configuration error: {0}")]
    Config(String),
}

/// Machine-readable classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    Unauthorized,
    NotFound,
    Storage,
    Embedding,
    Llm,
    Timeout,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Embedding => "embedding_error",
            ErrorKind::Llm => "llm_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::Unauthorized => ErrorKind::Unauthorized,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Storage { .. } => ErrorKind::Storage,
            CoreError::Embedding(_) => ErrorKind::Embedding,
            CoreError::Llm(_) => ErrorKind::Llm,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::Cancelled { .. } => ErrorKind::Cancelled,
            CoreError::Config(_) => ErrorKind::Config,
        }
    }

    /// Storage failure with a message and no underlying source.
    pub fn storage(message: impl Into<String>) -> Self {
        CoreError::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Storage failure wrapping an adapter error.
    pub fn storage_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CoreError::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}
