//! Transfer types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{RemoteError, RemoteHandle};

// ============================================================================
// Chunk Arithmetic
// ============================================================================

/// Number of chunks a file of `total_size` bytes splits into
pub fn chunk_count(total_size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size as u64;
    total_size.div_ceil(chunk_size)
}

/// Size of the chunk at `index`, or `None` past the end of the file
pub fn chunk_len(total_size: u64, chunk_size: usize, index: u64) -> Option<usize> {
    let start = index.checked_mul(chunk_size as u64)?;
    if start >= total_size {
        return None;
    }
    Some((total_size - start).min(chunk_size as u64) as usize)
}

// ============================================================================
// Status
// ============================================================================

/// Upload state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Initializing,
    Chunking,
    Uploading,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Allowed forward moves. `Chunking -> Completed` only happens for empty files.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Initializing, Chunking) => true,
            (Chunking, Uploading) => true,
            (Chunking, Completed) => true,
            (Uploading, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Chunking => "chunking",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = TransferError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "initializing" => Ok(Self::Initializing),
            "chunking" => Ok(Self::Chunking),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TransferError::Database(format!("Unknown transfer status: {}", other))),
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Top-level tracked transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: usize,
    pub chunk_count: u64,
    pub uploaded_count: u64,
    pub status: TransferStatus,
    /// SHA-256 of the whole file, known once every byte has been read
    pub file_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Create a fresh record in the `Initializing` state
    pub fn new(filename: impl Into<String>, total_size: u64, chunk_size: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            total_size,
            chunk_size,
            chunk_count: chunk_count(total_size, chunk_size),
            uploaded_count: 0,
            status: TransferStatus::Initializing,
            file_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            file_id: self.id,
            status: self.status,
            uploaded_count: self.uploaded_count,
            chunk_count: self.chunk_count,
        }
    }
}

/// Pointer to one pushed chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRef {
    pub file_id: Uuid,
    pub sequence_index: u64,
    pub remote_handle: RemoteHandle,
    pub content_hash: String,
    pub byte_size: usize,
}

/// Result of reading a file's chunk list for reconstruction
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkListing {
    /// Contiguous refs `0..chunk_count` whose sizes add up to the file size
    Complete {
        file: FileRecord,
        chunks: Vec<ChunkRef>,
    },
    /// Refs are missing, out of sequence or inconsistent with the file size
    Incomplete {
        file: FileRecord,
        found: u64,
    },
}

/// Aggregate numbers over all tracked files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_files: u64,
    pub total_bytes: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_progress: u64,
}

// ============================================================================
// Status Views
// ============================================================================

/// Committed progress of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub file_id: Uuid,
    pub status: TransferStatus,
    pub uploaded_count: u64,
    pub chunk_count: u64,
}

/// Status as exposed to polling clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Chunking,
    Uploading,
    Completed,
    Failed,
}

impl ReportedStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl From<TransferStatus> for ReportedStatus {
    fn from(status: TransferStatus) -> Self {
        match status {
            // Clients only see work in progress as chunking or uploading
            TransferStatus::Initializing | TransferStatus::Chunking => Self::Chunking,
            TransferStatus::Uploading => Self::Uploading,
            TransferStatus::Completed => Self::Completed,
            TransferStatus::Failed => Self::Failed,
        }
    }
}

/// Wire body of the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ReportedStatus,
    pub uploaded: u64,
    pub total: u64,
}

impl From<StatusSnapshot> for StatusReport {
    fn from(snapshot: StatusSnapshot) -> Self {
        Self {
            status: snapshot.status.into(),
            uploaded: snapshot.uploaded_count,
            total: snapshot.chunk_count,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Transfer error types
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Upload source unreadable: {0}")]
    SourceRead(String),

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote store rejected request: {0}")]
    RemoteRejected(String),

    #[error("Remote chunk not found: {0}")]
    RemoteNotFound(String),

    #[error("Chunk {index} failed integrity check: expected {expected}, got {actual}")]
    Integrity {
        index: u64,
        expected: String,
        actual: String,
    },

    #[error("File {file_id} has {found} of {expected} chunk references")]
    MetadataInconsistency {
        file_id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("Lost connection after {consecutive_failures} consecutive status poll failures")]
    ConnectionLost { consecutive_failures: u32 },

    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("File {file_id} is not ready for download (status: {status})")]
    NotReady {
        file_id: Uuid,
        status: TransferStatus,
    },

    #[error("Transfer {0} is still in progress")]
    TransferInProgress(Uuid),

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Too many concurrent downloads (max: {max})")]
    TooManyDownloads { max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SourceRead(_) => StatusCode::BAD_REQUEST,
            Self::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RemoteRejected(_) => StatusCode::BAD_GATEWAY,
            Self::RemoteNotFound(_) => StatusCode::BAD_GATEWAY,
            Self::Integrity { .. } => StatusCode::BAD_GATEWAY,
            Self::MetadataInconsistency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConnectionLost { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::FileNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotReady { .. } => StatusCode::CONFLICT,
            Self::TransferInProgress(_) => StatusCode::CONFLICT,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::TooManyDownloads { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceRead(_) => "SOURCE_READ_ERROR",
            Self::RemoteUnavailable(_) => "REMOTE_UNAVAILABLE",
            Self::RemoteRejected(_) => "REMOTE_REJECTED",
            Self::RemoteNotFound(_) => "REMOTE_NOT_FOUND",
            Self::Integrity { .. } => "INTEGRITY_ERROR",
            Self::MetadataInconsistency { .. } => "METADATA_INCONSISTENCY",
            Self::ConnectionLost { .. } => "CONNECTION_LOST",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::NotReady { .. } => "NOT_READY",
            Self::TransferInProgress(_) => "TRANSFER_IN_PROGRESS",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::TooManyDownloads { .. } => "TOO_MANY_DOWNLOADS",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<RemoteError> for TransferError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(msg) => Self::RemoteUnavailable(msg),
            RemoteError::Rejected(msg) => Self::RemoteRejected(msg),
            RemoteError::NotFound(msg) => Self::RemoteNotFound(msg),
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
