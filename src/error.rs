// src/error.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    // row violates a domain invariant (e.g. a cleaning record with two targets)
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// The next scheduled tick retries.
    #[error("transient store failure: {0}")]
    TransientStore(#[source] StoreError),

    #[error("downstream failure: {0}")]
    Downstream(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(what) => EngineError::Conflict(what),
            other => EngineError::TransientStore(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
