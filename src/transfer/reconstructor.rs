//! Download Reconstructor
//!
//! Two phases. [`DownloadReconstructor::prepare`] runs while the request is
//! being handled and copies everything a download needs into a
//! [`DownloadSnapshot`]. [`DownloadReconstructor::stream`] turns that
//! snapshot into a `'static` byte stream that pulls, verifies and yields one
//! chunk at a time. The stream owns its collaborators outright and never
//! borrows from the request that created it.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::db::MetadataStore;
use crate::storage::RemoteStore;

use super::retry::RetryPolicy;
use super::splitter::compute_hash;
use super::types::{ChunkListing, ChunkRef, TransferError, TransferStatus};

pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Everything needed to rebuild one file, detached from the metadata store
#[derive(Debug, Clone)]
pub struct DownloadSnapshot {
    pub file_id: Uuid,
    pub filename: String,
    pub total_size: u64,
    pub chunks: Arc<[ChunkRef]>,
}

#[derive(Clone)]
pub struct DownloadReconstructor {
    metadata: Arc<dyn MetadataStore>,
    remote: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    slots: Option<Arc<Semaphore>>,
    max_downloads: usize,
}

impl DownloadReconstructor {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        remote: Arc<dyn RemoteStore>,
        retry: RetryPolicy,
        max_downloads: usize,
    ) -> Self {
        let slots = (max_downloads > 0).then(|| Arc::new(Semaphore::new(max_downloads)));
        Self {
            metadata,
            remote,
            retry,
            slots,
            max_downloads,
        }
    }

    pub fn from_config(
        metadata: Arc<dyn MetadataStore>,
        remote: Arc<dyn RemoteStore>,
        config: &TransferConfig,
    ) -> Self {
        Self::new(
            metadata,
            remote,
            RetryPolicy::from_config(config),
            config.max_concurrent_downloads,
        )
    }

    /// Snapshot a completed file's chunk list
    pub async fn prepare(&self, file_id: Uuid) -> Result<DownloadSnapshot, TransferError> {
        let listing = self
            .metadata
            .chunk_listing(file_id)
            .await?
            .ok_or(TransferError::FileNotFound(file_id))?;

        match listing {
            ChunkListing::Complete { file, chunks } => {
                if file.status != TransferStatus::Completed {
                    return Err(TransferError::NotReady {
                        file_id,
                        status: file.status,
                    });
                }

                Ok(DownloadSnapshot {
                    file_id,
                    filename: file.filename,
                    total_size: file.total_size,
                    chunks: chunks.into(),
                })
            }
            ChunkListing::Incomplete { file, found } => {
                if file.status != TransferStatus::Completed {
                    return Err(TransferError::NotReady {
                        file_id,
                        status: file.status,
                    });
                }

                tracing::error!(
                    file_id = %file_id,
                    expected = file.chunk_count,
                    found,
                    "Completed file has an incomplete chunk list"
                );
                Err(TransferError::MetadataInconsistency {
                    file_id,
                    expected: file.chunk_count,
                    found,
                })
            }
        }
    }

    /// Open the byte stream for a snapshot.
    ///
    /// Fails up front only when no download slot is free. Pull and integrity
    /// errors end the stream after the bytes already yielded.
    pub fn stream(&self, snapshot: DownloadSnapshot) -> Result<ByteStream, TransferError> {
        let permit = match &self.slots {
            Some(slots) => Some(slots.clone().try_acquire_owned().map_err(|_| {
                TransferError::TooManyDownloads {
                    max: self.max_downloads,
                }
            })?),
            None => None,
        };

        tracing::info!(
            file_id = %snapshot.file_id,
            chunks = snapshot.chunks.len(),
            size = snapshot.total_size,
            "Download started"
        );

        let state = StreamState {
            remote: self.remote.clone(),
            retry: self.retry.clone(),
            snapshot,
            next: 0,
            _permit: permit,
        };

        Ok(futures::stream::try_unfold(state, StreamState::next_chunk).boxed())
    }
}

/// Owned state carried between chunk pulls
struct StreamState {
    remote: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    snapshot: DownloadSnapshot,
    next: usize,
    _permit: Option<OwnedSemaphorePermit>,
}

impl StreamState {
    async fn next_chunk(mut self) -> Result<Option<(Bytes, Self)>, TransferError> {
        let Some(chunk) = self.snapshot.chunks.get(self.next).cloned() else {
            tracing::info!(file_id = %self.snapshot.file_id, "Download finished");
            return Ok(None);
        };

        let data = self.pull(&chunk).await.map_err(|e| {
            tracing::error!(
                file_id = %chunk.file_id,
                chunk_index = chunk.sequence_index,
                error = %e,
                "Download aborted"
            );
            e
        })?;

        self.next += 1;
        Ok(Some((data, self)))
    }

    async fn pull(&self, chunk: &ChunkRef) -> Result<Bytes, TransferError> {
        let remote = &self.remote;
        let data = self
            .retry
            .run("pull", || remote.pull(&chunk.remote_handle))
            .await?;

        let actual = compute_hash(&data);
        if actual != chunk.content_hash || data.len() != chunk.byte_size {
            return Err(TransferError::Integrity {
                index: chunk.sequence_index,
                expected: chunk.content_hash.clone(),
                actual,
            });
        }

        Ok(data)
    }
}

// ============================================================================
// Tests
// ============================================================================
