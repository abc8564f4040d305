//! Upload Orchestrator
//!
//! Drives one upload from a byte source to a set of pushed chunks:
//! register the record, split the source, push chunks with bounded retry
//! and bounded parallelism, and commit each pushed chunk to the metadata
//! store as soon as it lands. Owns the upload state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::db::MetadataStore;
use crate::storage::RemoteStore;

use super::retry::RetryPolicy;
use super::source::UploadSource;
use super::splitter::{Chunk, ChunkSplitter};
use super::tracker::StatusTracker;
use super::types::{ChunkRef, FileRecord, StatusSnapshot, TransferError, TransferStatus};

/// Attempts at recording a failed upload before leaving it to the startup sweep
const FAIL_MARK_ATTEMPTS: u32 = 3;
const FAIL_MARK_DELAY: Duration = Duration::from_millis(50);

/// Per-upload knobs
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub chunk_size: usize,
    pub parallelism: usize,
    pub push_interval: Duration,
    pub max_file_size: u64,
    pub retry: RetryPolicy,
}

impl UploadSettings {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            parallelism: config.parallelism.max(1),
            push_interval: config.push_interval,
            max_file_size: config.max_file_size,
            retry: RetryPolicy::from_config(config),
        }
    }
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    metadata: Arc<dyn MetadataStore>,
    remote: Arc<dyn RemoteStore>,
    tracker: StatusTracker,
    settings: UploadSettings,
}

impl UploadOrchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        remote: Arc<dyn RemoteStore>,
        tracker: StatusTracker,
        settings: UploadSettings,
    ) -> Self {
        Self {
            metadata,
            remote,
            tracker,
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Register a transfer and run it in the background, returning its id
    pub async fn initiate(&self, filename: &str, source: UploadSource) -> Result<Uuid, TransferError> {
        let (file_id, _task) = self.start(filename, source).await?;
        Ok(file_id)
    }

    /// Like [`initiate`](Self::initiate), also handing back the task so
    /// callers can wait for the terminal status
    pub async fn start(
        &self,
        filename: &str,
        source: UploadSource,
    ) -> Result<(Uuid, JoinHandle<TransferStatus>), TransferError> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(TransferError::InvalidRequest("filename is required".to_string()));
        }

        let size = source.size();
        let max = self.settings.max_file_size;
        if max > 0 && size > max {
            return Err(TransferError::FileTooLarge { size, max });
        }

        let record = FileRecord::new(filename, size, self.settings.chunk_size);
        self.metadata.create_file(&record).await?;
        self.tracker.publish(record.snapshot());

        tracing::info!(
            file_id = %record.id,
            filename = %record.filename,
            size = record.total_size,
            chunks = record.chunk_count,
            "Upload initiated"
        );

        let file_id = record.id;
        let run = UploadRun {
            metadata: self.metadata.clone(),
            remote: self.remote.clone(),
            tracker: self.tracker.clone(),
            settings: self.settings.clone(),
            file: record,
            status: TransferStatus::Initializing,
            uploaded: 0,
        };

        let task = tokio::spawn(run.execute(source));
        Ok((file_id, task))
    }
}

// ============================================================================
// Upload Run
// ============================================================================

/// State of one background upload
struct UploadRun {
    metadata: Arc<dyn MetadataStore>,
    remote: Arc<dyn RemoteStore>,
    tracker: StatusTracker,
    settings: UploadSettings,
    file: FileRecord,
    /// Last status committed to the store
    status: TransferStatus,
    uploaded: u64,
}

impl UploadRun {
    async fn execute(mut self, source: UploadSource) -> TransferStatus {
        let file_id = self.file.id;

        let final_status = match self.drive(source).await {
            Ok(()) => {
                tracing::info!(
                    file_id = %file_id,
                    chunks = self.file.chunk_count,
                    "Upload completed"
                );
                TransferStatus::Completed
            }
            Err(e) => {
                tracing::error!(
                    file_id = %file_id,
                    status = %self.status,
                    uploaded = self.uploaded,
                    error = %e,
                    "Upload failed"
                );
                self.fail().await;
                TransferStatus::Failed
            }
        };

        self.tracker.retire(file_id);
        final_status
    }

    /// Runs the upload. `source` is dropped before this returns on every path.
    async fn drive(&mut self, source: UploadSource) -> Result<(), TransferError> {
        self.remote.probe().await?;
        self.advance(TransferStatus::Chunking).await?;

        let mut splitter = ChunkSplitter::new(source, self.file.total_size, self.file.chunk_size);
        let mut in_flight: JoinSet<Result<ChunkRef, TransferError>> = JoinSet::new();
        let mut first_error: Option<TransferError> = None;
        let mut exhausted = false;
        let mut started = 0u64;

        loop {
            // Keep up to `parallelism` pushes running until the source runs dry
            while first_error.is_none() && !exhausted && in_flight.len() < self.settings.parallelism {
                if started > 0 && !self.settings.push_interval.is_zero() {
                    tokio::time::sleep(self.settings.push_interval).await;
                }

                match splitter.next_chunk().await {
                    Ok(Some(chunk)) => {
                        self.spawn_push(&mut in_flight, chunk);
                        started += 1;
                    }
                    Ok(None) => exhausted = true,
                    Err(e) => first_error = Some(e),
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            let pushed = joined
                .map_err(|e| TransferError::Internal(format!("Push task failed: {}", e)))
                .and_then(|result| result);

            // Chunks that landed are still committed after another push failed
            let committed = match pushed {
                Ok(chunk) => self.commit(&chunk).await,
                Err(e) => Err(e),
            };

            if let Err(e) = committed {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    tracing::warn!(file_id = %self.file.id, error = %e, "Additional chunk failure");
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let file_hash = splitter
            .file_hash()
            .ok_or_else(|| TransferError::Internal("source not fully consumed".to_string()))?;
        drop(splitter);

        self.metadata
            .complete_file(self.file.id, self.status, &file_hash)
            .await?;
        self.status = TransferStatus::Completed;
        self.tracker.publish(self.snapshot());
        Ok(())
    }

    fn spawn_push(&self, in_flight: &mut JoinSet<Result<ChunkRef, TransferError>>, chunk: Chunk) {
        let remote = self.remote.clone();
        let retry = self.settings.retry.clone();
        let file_id = self.file.id;

        in_flight.spawn(async move {
            let byte_size = chunk.len();
            let data = chunk.data;

            let remote_handle = retry
                .run("push", || {
                    let remote = remote.clone();
                    let data = data.clone();
                    async move { remote.push(data).await }
                })
                .await?;

            tracing::debug!(
                file_id = %file_id,
                index = chunk.index,
                size = byte_size,
                handle = %remote_handle,
                "Chunk pushed"
            );

            Ok(ChunkRef {
                file_id,
                sequence_index: chunk.index,
                remote_handle,
                content_hash: chunk.hash,
                byte_size,
            })
        });
    }

    /// Persist a pushed chunk and publish the new progress
    async fn commit(&mut self, chunk: &ChunkRef) -> Result<(), TransferError> {
        if self.status == TransferStatus::Chunking {
            self.advance(TransferStatus::Uploading).await?;
        }

        self.uploaded = self.metadata.record_chunk(chunk).await?;
        self.tracker.publish(self.snapshot());
        Ok(())
    }

    async fn advance(&mut self, to: TransferStatus) -> Result<(), TransferError> {
        self.metadata.transition(self.file.id, self.status, to).await?;
        tracing::debug!(file_id = %self.file.id, from = %self.status, to = %to, "Status changed");
        self.status = to;
        self.tracker.publish(self.snapshot());
        Ok(())
    }

    async fn fail(&mut self) {
        if self.status.is_terminal() {
            return;
        }

        for attempt in 1..=FAIL_MARK_ATTEMPTS {
            match self
                .metadata
                .transition(self.file.id, self.status, TransferStatus::Failed)
                .await
            {
                Ok(()) => {
                    self.status = TransferStatus::Failed;
                    self.tracker.publish(self.snapshot());
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        file_id = %self.file.id,
                        attempt,
                        error = %e,
                        "Failed to mark upload as failed"
                    );
                    if attempt < FAIL_MARK_ATTEMPTS {
                        tokio::time::sleep(FAIL_MARK_DELAY * attempt).await;
                    }
                }
            }
        }

        // Left for the startup sweep
        tracing::error!(
            file_id = %self.file.id,
            status = %self.status,
            "Upload record stuck in a non-terminal status"
        );
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            file_id: self.file.id,
            status: self.status,
            uploaded_count: self.uploaded,
            chunk_count: self.file.chunk_count,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{memory_metadata, pattern, test_transfer_config, FlakyRemote, RecordingMetadata};
    use crate::transfer::{compute_hash, ChunkListing};

    struct Harness {
        orchestrator: UploadOrchestrator,
        metadata: Arc<dyn MetadataStore>,
        remote: FlakyRemote,
        tracker: StatusTracker,
    }

    async fn harness(config: TransferConfig) -> Harness {
        harness_with(config, memory_metadata().await)
    }

    fn harness_with(config: TransferConfig, metadata: Arc<dyn MetadataStore>) -> Harness {
        let remote = FlakyRemote::new();
        let tracker = StatusTracker::new(metadata.clone());
        let orchestrator = UploadOrchestrator::new(
            metadata.clone(),
            Arc::new(remote.clone()),
            tracker.clone(),
            UploadSettings::from_config(&config),
        );
        Harness {
            orchestrator,
            metadata,
            remote,
            tracker,
        }
    }

    async fn run(h: &Harness, data: Vec<u8>) -> (Uuid, TransferStatus) {
        let (id, task) = h
            .orchestrator
            .start("data.bin", UploadSource::from_bytes(data))
            .await
            .unwrap();
        (id, task.await.unwrap())
    }

    #[tokio::test]
    async fn test_upload_completes_with_all_chunks() {
        let h = harness(test_transfer_config(20)).await;
        let data = pattern(45);

        let (id, status) = run(&h, data.clone()).await;
        assert_eq!(status, TransferStatus::Completed);

        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.status, TransferStatus::Completed);
        assert_eq!(file.chunk_count, 3);
        assert_eq!(file.uploaded_count, 3);
        assert_eq!(file.file_hash, Some(compute_hash(&data)));

        match h.metadata.chunk_listing(id).await.unwrap().unwrap() {
            ChunkListing::Complete { chunks, .. } => {
                let sizes: Vec<usize> = chunks.iter().map(|c| c.byte_size).collect();
                assert_eq!(sizes, vec![20, 20, 5]);
            }
            other => panic!("expected complete listing, got {:?}", other),
        }
        assert_eq!(h.remote.stored(), 3);
        assert_eq!(h.tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_completes_without_pushes() {
        let h = harness(test_transfer_config(20)).await;

        let (id, status) = run(&h, Vec::new()).await;
        assert_eq!(status, TransferStatus::Completed);

        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.chunk_count, 0);
        assert_eq!(h.remote.push_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_push_failures_are_retried() {
        let h = harness(test_transfer_config(10)).await;
        h.remote.fail_next_pushes(2);

        let (id, status) = run(&h, pattern(30)).await;
        assert_eq!(status, TransferStatus::Completed);
        assert_eq!(h.remote.push_calls(), 5);

        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.uploaded_count, 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_upload() {
        let h = harness(test_transfer_config(10)).await;
        h.remote.fail_pushes_after(2);

        let (id, status) = run(&h, pattern(50)).await;
        assert_eq!(status, TransferStatus::Failed);

        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.status, TransferStatus::Failed);
        assert_eq!(file.uploaded_count, 2);

        // Pushed chunks stay where they are
        assert_eq!(h.metadata.chunk_refs(id).await.unwrap().len(), 2);
        assert_eq!(h.remote.stored(), 2);

        // Three attempts for chunk 2, nothing after it
        assert_eq!(h.remote.push_calls(), 2 + 3);
    }

    #[tokio::test]
    async fn test_status_path_of_a_completed_upload() {
        let recorder = RecordingMetadata::new().await;
        let h = harness_with(test_transfer_config(20), Arc::new(recorder.clone()));

        let (_, status) = run(&h, pattern(45)).await;
        assert_eq!(status, TransferStatus::Completed);
        assert_eq!(
            recorder.statuses(),
            vec![
                TransferStatus::Initializing,
                TransferStatus::Chunking,
                TransferStatus::Uploading,
                TransferStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_second_chunk_failure_stops_the_upload() {
        let recorder = RecordingMetadata::new().await;
        let h = harness_with(test_transfer_config(20), Arc::new(recorder.clone()));
        h.remote.fail_pushes_after(1);

        let (id, status) = run(&h, pattern(45)).await;
        assert_eq!(status, TransferStatus::Failed);

        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.status, TransferStatus::Failed);
        assert_eq!(file.uploaded_count, 1);

        // One push for chunk 1, three attempts for chunk 2, none for chunk 3
        assert_eq!(h.remote.push_calls(), 1 + 3);
        assert_eq!(
            recorder.statuses(),
            vec![
                TransferStatus::Initializing,
                TransferStatus::Chunking,
                TransferStatus::Uploading,
                TransferStatus::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_marking_failed_is_retried() {
        let recorder = RecordingMetadata::new().await;
        let h = harness_with(test_transfer_config(10), Arc::new(recorder.clone()));
        h.remote.set_unreachable(true);
        recorder.refuse_fail_transitions(FAIL_MARK_ATTEMPTS as usize - 1);

        let (id, status) = run(&h, pattern(25)).await;
        assert_eq!(status, TransferStatus::Failed);

        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn test_unmarkable_failure_is_left_for_the_sweep() {
        let recorder = RecordingMetadata::new().await;
        let h = harness_with(test_transfer_config(10), Arc::new(recorder.clone()));
        h.remote.set_unreachable(true);
        recorder.refuse_fail_transitions(FAIL_MARK_ATTEMPTS as usize);

        let (id, _) = run(&h, pattern(25)).await;
        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.status, TransferStatus::Initializing);
        assert_eq!(h.tracker.active(), 0);

        assert_eq!(h.metadata.fail_interrupted().await.unwrap(), 1);
        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn test_rejected_push_is_not_retried() {
        let h = harness(test_transfer_config(10)).await;
        h.remote.reject_pushes();

        let (_, status) = run(&h, pattern(25)).await;
        assert_eq!(status, TransferStatus::Failed);
        assert_eq!(h.remote.push_calls(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_remote_fails_before_chunking() {
        let h = harness(test_transfer_config(10)).await;
        h.remote.set_unreachable(true);

        let (id, status) = run(&h, pattern(25)).await;
        assert_eq!(status, TransferStatus::Failed);
        assert_eq!(h.remote.push_calls(), 0);

        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn test_short_source_fails_upload() {
        let h = harness(test_transfer_config(10)).await;

        // Claims 40 bytes, delivers 25
        let source = UploadSource::from_reader(std::io::Cursor::new(pattern(25)), 40);
        let (id, task) = h.orchestrator.start("short.bin", source).await.unwrap();
        assert_eq!(task.await.unwrap(), TransferStatus::Failed);

        let file = h.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(file.status, TransferStatus::Failed);
        assert_eq!(file.uploaded_count, 2);
    }

    #[tokio::test]
    async fn test_parallel_pushes_keep_sequence_order() {
        let mut config = test_transfer_config(8);
        config.parallelism = 4;
        let h = harness(config).await;
        h.remote.delay_pushes(Duration::from_millis(5));

        let data = pattern(100);
        let (id, status) = run(&h, data.clone()).await;
        assert_eq!(status, TransferStatus::Completed);

        let chunks = h.metadata.chunk_refs(id).await.unwrap();
        assert_eq!(chunks.len(), 13);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence_index, i as u64);
            let start = i * 8;
            let end = (start + 8).min(data.len());
            assert_eq!(chunk.content_hash, compute_hash(&data[start..end]));
        }
    }

    #[tokio::test]
    async fn test_oversized_source_rejected_up_front() {
        let mut config = test_transfer_config(10);
        config.max_file_size = 16;
        let h = harness(config).await;

        let result = h
            .orchestrator
            .initiate("big.bin", UploadSource::from_bytes(pattern(17)))
            .await;
        assert!(matches!(result, Err(TransferError::FileTooLarge { size: 17, max: 16 })));
        assert!(h.metadata.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_filename_rejected() {
        let h = harness(test_transfer_config(10)).await;
        let result = h
            .orchestrator
            .initiate("   ", UploadSource::from_bytes(pattern(5)))
            .await;
        assert!(matches!(result, Err(TransferError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_concurrent_uploads_are_independent() {
        let h = harness(test_transfer_config(16)).await;

        let (a, task_a) = h
            .orchestrator
            .start("a.bin", UploadSource::from_bytes(pattern(40)))
            .await
            .unwrap();
        let (b, task_b) = h
            .orchestrator
            .start("b.bin", UploadSource::from_bytes(pattern(70)))
            .await
            .unwrap();

        assert_eq!(task_a.await.unwrap(), TransferStatus::Completed);
        assert_eq!(task_b.await.unwrap(), TransferStatus::Completed);

        assert_eq!(h.metadata.chunk_refs(a).await.unwrap().len(), 3);
        assert_eq!(h.metadata.chunk_refs(b).await.unwrap().len(), 5);
    }
}
