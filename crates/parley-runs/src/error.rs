use thiserror::Error;

/// Errors that can occur during run-store operations.
#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("run not found: {0}")]
    NotFound(String),
}
