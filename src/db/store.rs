//! Metadata store interface

use uuid::Uuid;

use crate::transfer::{ChunkListing, ChunkRef, FileRecord, StoreStats, TransferError, TransferStatus};

/// Persistence for file records and their chunk references.
///
/// Implementations must make `record_chunk` atomic: the chunk row and the
/// `uploaded_count` increment become visible together or not at all.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record
    async fn create_file(&self, record: &FileRecord) -> Result<(), TransferError>;

    /// Move a record from `from` to `to`; fails if the stored status is not `from`
    async fn transition(
        &self,
        file_id: Uuid,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<(), TransferError>;

    /// Persist a chunk reference and bump the uploaded counter, returning the new count
    async fn record_chunk(&self, chunk: &ChunkRef) -> Result<u64, TransferError>;

    /// Mark a record `Completed` and store the whole-file hash
    async fn complete_file(
        &self,
        file_id: Uuid,
        from: TransferStatus,
        file_hash: &str,
    ) -> Result<(), TransferError>;

    async fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, TransferError>;

    /// Read a record and its chunk list in one consistent view
    async fn chunk_listing(&self, file_id: Uuid) -> Result<Option<ChunkListing>, TransferError>;

    /// Every chunk reference stored for a file, complete or not
    async fn chunk_refs(&self, file_id: Uuid) -> Result<Vec<ChunkRef>, TransferError>;

    /// All records, newest first
    async fn list_files(&self) -> Result<Vec<FileRecord>, TransferError>;

    /// Remove a record and (by cascade) its chunk references
    async fn delete_file(&self, file_id: Uuid) -> Result<bool, TransferError>;

    /// Mark every non-terminal record `Failed`, returning how many changed.
    ///
    /// Run at startup: no upload task survives a restart.
    async fn fail_interrupted(&self) -> Result<u64, TransferError>;

    async fn stats(&self) -> Result<StoreStats, TransferError>;
}
