//! Infrastructure error types for the Chunkvault server
//!
//! Transfer-level failures live in [`crate::transfer::TransferError`]; this
//! module covers startup and wiring (configuration, database, storage).

use thiserror::Error;

use crate::storage::RemoteError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] RemoteError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
