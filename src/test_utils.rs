//! Shared fixtures for unit tests

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use sqlx::SqlitePool;

use uuid::Uuid;

use crate::config::TransferConfig;
use crate::db::{create_pool, MetadataStore, SqliteMetadataStore};
use crate::storage::{MemoryRemoteStore, RemoteError, RemoteHandle, RemoteStore};
use crate::transfer::{ChunkListing, ChunkRef, FileRecord, StoreStats, TransferError, TransferStatus};

/// Memory-backed remote with injectable failures
#[derive(Clone, Default)]
pub struct FlakyRemote {
    inner: MemoryRemoteStore,
    faults: Arc<Mutex<Faults>>,
}

#[derive(Default)]
struct Faults {
    /// Pushes start failing for good after this many successes
    healthy_pushes: Option<usize>,
    transient_push_failures: usize,
    transient_pull_failures: usize,
    rejected_pushes: bool,
    unreachable: bool,
    push_delay: Duration,
    push_calls: usize,
    pushes_ok: usize,
    pull_calls: usize,
}

impl FlakyRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_pushes_after(&self, successes: usize) {
        self.faults.lock().healthy_pushes = Some(successes);
    }

    pub fn fail_next_pushes(&self, count: usize) {
        self.faults.lock().transient_push_failures = count;
    }

    pub fn fail_next_pulls(&self, count: usize) {
        self.faults.lock().transient_pull_failures = count;
    }

    pub fn reject_pushes(&self) {
        self.faults.lock().rejected_pushes = true;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.lock().unreachable = unreachable;
    }

    pub fn delay_pushes(&self, delay: Duration) {
        self.faults.lock().push_delay = delay;
    }

    pub fn push_calls(&self) -> usize {
        self.faults.lock().push_calls
    }

    pub fn pull_calls(&self) -> usize {
        self.faults.lock().pull_calls
    }

    /// Chunks currently held
    pub fn stored(&self) -> usize {
        self.inner.len()
    }

    /// Overwrite a stored chunk, simulating backend corruption
    pub fn corrupt(&self, handle: &RemoteHandle, data: impl Into<Bytes>) -> bool {
        self.inner.replace(handle, data.into())
    }
}

#[async_trait::async_trait]
impl RemoteStore for FlakyRemote {
    async fn push(&self, data: Bytes) -> Result<RemoteHandle, RemoteError> {
        let delay = {
            let mut faults = self.faults.lock();
            faults.push_calls += 1;

            if faults.unreachable {
                return Err(RemoteError::Unavailable("connection refused".into()));
            }
            if faults.rejected_pushes {
                return Err(RemoteError::Rejected("access denied".into()));
            }
            if faults.transient_push_failures > 0 {
                faults.transient_push_failures -= 1;
                return Err(RemoteError::Unavailable("503 slow down".into()));
            }
            if let Some(limit) = faults.healthy_pushes {
                if faults.pushes_ok >= limit {
                    return Err(RemoteError::Unavailable("backend down".into()));
                }
            }
            faults.pushes_ok += 1;
            faults.push_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.push(data).await
    }

    async fn pull(&self, handle: &RemoteHandle) -> Result<Bytes, RemoteError> {
        {
            let mut faults = self.faults.lock();
            faults.pull_calls += 1;

            if faults.unreachable {
                return Err(RemoteError::Unavailable("connection refused".into()));
            }
            if faults.transient_pull_failures > 0 {
                faults.transient_pull_failures -= 1;
                return Err(RemoteError::Unavailable("connection reset".into()));
            }
        }

        self.inner.pull(handle).await
    }

    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError> {
        self.inner.delete(handle).await
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        if self.faults.lock().unreachable {
            return Err(RemoteError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

pub async fn memory_pool() -> SqlitePool {
    create_pool("sqlite::memory:").await.unwrap()
}

pub async fn memory_metadata() -> Arc<dyn MetadataStore> {
    Arc::new(SqliteMetadataStore::new(memory_pool().await))
}

/// Metadata store that records every committed status and can refuse
/// transitions to `Failed`
#[derive(Clone)]
pub struct RecordingMetadata {
    inner: Arc<dyn MetadataStore>,
    statuses: Arc<Mutex<Vec<TransferStatus>>>,
    refused_fail_transitions: Arc<Mutex<usize>>,
}

impl RecordingMetadata {
    pub async fn new() -> Self {
        Self {
            inner: memory_metadata().await,
            statuses: Arc::default(),
            refused_fail_transitions: Arc::default(),
        }
    }

    /// Statuses in the order they were written
    pub fn statuses(&self) -> Vec<TransferStatus> {
        self.statuses.lock().clone()
    }

    pub fn refuse_fail_transitions(&self, count: usize) {
        *self.refused_fail_transitions.lock() = count;
    }
}

#[async_trait::async_trait]
impl MetadataStore for RecordingMetadata {
    async fn create_file(&self, record: &FileRecord) -> Result<(), TransferError> {
        self.inner.create_file(record).await?;
        self.statuses.lock().push(record.status);
        Ok(())
    }

    async fn transition(
        &self,
        file_id: Uuid,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<(), TransferError> {
        if to == TransferStatus::Failed {
            let mut refused = self.refused_fail_transitions.lock();
            if *refused > 0 {
                *refused -= 1;
                return Err(TransferError::Database("database is locked".into()));
            }
        }
        self.inner.transition(file_id, from, to).await?;
        self.statuses.lock().push(to);
        Ok(())
    }

    async fn record_chunk(&self, chunk: &ChunkRef) -> Result<u64, TransferError> {
        self.inner.record_chunk(chunk).await
    }

    async fn complete_file(
        &self,
        file_id: Uuid,
        from: TransferStatus,
        file_hash: &str,
    ) -> Result<(), TransferError> {
        self.inner.complete_file(file_id, from, file_hash).await?;
        self.statuses.lock().push(TransferStatus::Completed);
        Ok(())
    }

    async fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, TransferError> {
        self.inner.get_file(file_id).await
    }

    async fn chunk_listing(&self, file_id: Uuid) -> Result<Option<ChunkListing>, TransferError> {
        self.inner.chunk_listing(file_id).await
    }

    async fn chunk_refs(&self, file_id: Uuid) -> Result<Vec<ChunkRef>, TransferError> {
        self.inner.chunk_refs(file_id).await
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, TransferError> {
        self.inner.list_files().await
    }

    async fn delete_file(&self, file_id: Uuid) -> Result<bool, TransferError> {
        self.inner.delete_file(file_id).await
    }

    async fn fail_interrupted(&self) -> Result<u64, TransferError> {
        self.inner.fail_interrupted().await
    }

    async fn stats(&self) -> Result<StoreStats, TransferError> {
        self.inner.stats().await
    }
}

/// Small chunks and fast retries
pub fn test_transfer_config(chunk_size: usize) -> TransferConfig {
    TransferConfig {
        chunk_size,
        retry_base_delay: Duration::from_millis(1),
        remote_timeout: Duration::from_secs(5),
        ..TransferConfig::default()
    }
}

/// Deterministic payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
