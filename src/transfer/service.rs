//! Transfer service
//!
//! Entry point used by the HTTP layer. Wires the orchestrator, tracker and
//! reconstructor to one metadata store and one remote store.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::db::MetadataStore;
use crate::storage::RemoteStore;

use super::orchestrator::{UploadOrchestrator, UploadSettings};
use super::reconstructor::{ByteStream, DownloadReconstructor, DownloadSnapshot};
use super::source::UploadSource;
use super::tracker::StatusTracker;
use super::types::{FileRecord, StatusReport, StoreStats, TransferError};

/// Outcome of deleting a file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub file_id: Uuid,
    pub chunks_deleted: usize,
    /// Remote deletes that failed; the chunks are orphaned
    pub chunks_orphaned: usize,
}

#[derive(Clone)]
pub struct TransferService {
    metadata: Arc<dyn MetadataStore>,
    remote: Arc<dyn RemoteStore>,
    orchestrator: UploadOrchestrator,
    tracker: StatusTracker,
    reconstructor: DownloadReconstructor,
}

impl TransferService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        remote: Arc<dyn RemoteStore>,
        config: &TransferConfig,
    ) -> Self {
        let tracker = StatusTracker::new(metadata.clone());
        let orchestrator = UploadOrchestrator::new(
            metadata.clone(),
            remote.clone(),
            tracker.clone(),
            UploadSettings::from_config(config),
        );
        let reconstructor = DownloadReconstructor::from_config(metadata.clone(), remote.clone(), config);

        Self {
            metadata,
            remote,
            orchestrator,
            tracker,
            reconstructor,
        }
    }

    pub fn orchestrator(&self) -> &UploadOrchestrator {
        &self.orchestrator
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn remote_name(&self) -> &'static str {
        self.remote.name()
    }

    pub async fn initiate(&self, filename: &str, source: UploadSource) -> Result<Uuid, TransferError> {
        self.orchestrator.initiate(filename, source).await
    }

    pub async fn status(&self, file_id: Uuid) -> Result<StatusReport, TransferError> {
        Ok(self.tracker.query(file_id).await?.into())
    }

    pub async fn prepare_download(&self, file_id: Uuid) -> Result<DownloadSnapshot, TransferError> {
        self.reconstructor.prepare(file_id).await
    }

    pub fn stream_download(&self, snapshot: DownloadSnapshot) -> Result<ByteStream, TransferError> {
        self.reconstructor.stream(snapshot)
    }

    pub async fn get_file(&self, file_id: Uuid) -> Result<FileRecord, TransferError> {
        self.metadata
            .get_file(file_id)
            .await?
            .ok_or(TransferError::FileNotFound(file_id))
    }

    pub async fn list_files(&self) -> Result<Vec<FileRecord>, TransferError> {
        self.metadata.list_files().await
    }

    pub async fn stats(&self) -> Result<StoreStats, TransferError> {
        self.metadata.stats().await
    }

    /// Delete a finished transfer: remote chunks first (best-effort), then the record
    pub async fn delete(&self, file_id: Uuid) -> Result<DeleteReport, TransferError> {
        let file = self.get_file(file_id).await?;
        if !file.status.is_terminal() {
            return Err(TransferError::TransferInProgress(file_id));
        }

        let chunks = self.metadata.chunk_refs(file_id).await?;
        let mut deleted = 0;
        let mut orphaned = 0;

        for chunk in &chunks {
            match self.remote.delete(&chunk.remote_handle).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    orphaned += 1;
                    tracing::warn!(
                        file_id = %file_id,
                        chunk_index = chunk.sequence_index,
                        handle = %chunk.remote_handle,
                        error = %e,
                        "Failed to delete remote chunk"
                    );
                }
            }
        }

        if !self.metadata.delete_file(file_id).await? {
            return Err(TransferError::FileNotFound(file_id));
        }

        tracing::info!(
            file_id = %file_id,
            chunks_deleted = deleted,
            chunks_orphaned = orphaned,
            "File deleted"
        );

        Ok(DeleteReport {
            file_id,
            chunks_deleted: deleted,
            chunks_orphaned: orphaned,
        })
    }
}
