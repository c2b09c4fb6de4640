//! Error taxonomy shared across the store, the watcher, and the HTTP surface.
//!
//! `spec.md` §7 defines four buckets: Validation, NotFound, Transient, Fatal.
//! `StoreError` covers the store's own error shape; `DevtraceError` is the
//! umbrella type everything else converges to, so HTTP handlers have one
//! place (`src/http/error.rs`) to map errors to status codes.

use thiserror::Error;

/// Errors returned by [`crate::store::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
}

/// Umbrella error type for request-handling and background paths.
#[derive(Debug, Error)]
pub enum DevtraceError {
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl From<StoreError> for DevtraceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => DevtraceError::NotFound,
            StoreError::Conflict(msg) => DevtraceError::Validation(format!("conflict: {msg}")),
            StoreError::Invalid(msg) => DevtraceError::Validation(msg),
            StoreError::Backend(err) => DevtraceError::Transient(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DevtraceError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
