//! File and chunk record database operations

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::storage::RemoteHandle;
use crate::transfer::{ChunkListing, ChunkRef, FileRecord, StoreStats, TransferError, TransferStatus};

use super::store::MetadataStore;

/// File record row
#[derive(Debug, Clone, sqlx::FromRow)]
struct FileRow {
    id: String,
    filename: String,
    total_size: i64,
    chunk_size: i64,
    chunk_count: i64,
    uploaded_count: i64,
    status: String,
    file_hash: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = TransferError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(FileRecord {
            id: parse_uuid(&row.id)?,
            filename: row.filename,
            total_size: row.total_size as u64,
            chunk_size: row.chunk_size as usize,
            chunk_count: row.chunk_count as u64,
            uploaded_count: row.uploaded_count as u64,
            status: row.status.parse()?,
            file_hash: row.file_hash,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

/// Chunk reference row
#[derive(Debug, Clone, sqlx::FromRow)]
struct ChunkRow {
    file_id: String,
    sequence_index: i64,
    remote_handle: String,
    content_hash: String,
    byte_size: i64,
}

impl TryFrom<ChunkRow> for ChunkRef {
    type Error = TransferError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        Ok(ChunkRef {
            file_id: parse_uuid(&row.file_id)?,
            sequence_index: row.sequence_index as u64,
            remote_handle: RemoteHandle::new(row.remote_handle),
            content_hash: row.content_hash,
            byte_size: row.byte_size as usize,
        })
    }
}

const FILE_COLUMNS: &str = "id, filename, total_size, chunk_size, chunk_count, uploaded_count, \
                            status, file_hash, created_at, updated_at";

const CHUNK_COLUMNS: &str = "file_id, sequence_index, remote_handle, content_hash, byte_size";

/// SQLite-backed metadata store
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Distinguish "no such file" from "status moved underneath us"
    async fn guard_failure(&self, file_id: Uuid, expected: TransferStatus) -> TransferError {
        match self.get_file(file_id).await {
            Ok(Some(file)) => TransferError::Internal(format!(
                "File {} is {}, expected {}",
                file_id, file.status, expected
            )),
            Ok(None) => TransferError::FileNotFound(file_id),
            Err(e) => e,
        }
    }
}

#[async_trait::async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_file(&self, record: &FileRecord) -> Result<(), TransferError> {
        sqlx::query(
            r#"
            INSERT INTO files (id, filename, total_size, chunk_size, chunk_count,
                               uploaded_count, status, file_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.filename)
        .bind(record.total_size as i64)
        .bind(record.chunk_size as i64)
        .bind(record.chunk_count as i64)
        .bind(record.uploaded_count as i64)
        .bind(record.status.as_str())
        .bind(&record.file_hash)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transition(
        &self,
        file_id: Uuid,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<(), TransferError> {
        if !from.can_transition_to(to) {
            return Err(TransferError::Internal(format!(
                "Illegal status transition {} -> {}",
                from, to
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE files SET status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(file_id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.guard_failure(file_id, from).await);
        }

        Ok(())
    }

    async fn record_chunk(&self, chunk: &ChunkRef) -> Result<u64, TransferError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chunks (file_id, sequence_index, remote_handle, content_hash, byte_size, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chunk.file_id.to_string())
        .bind(chunk.sequence_index as i64)
        .bind(chunk.remote_handle.as_str())
        .bind(&chunk.content_hash)
        .bind(chunk.byte_size as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let uploaded: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE files SET uploaded_count = uploaded_count + 1, updated_at = ?
            WHERE id = ? AND status IN ('chunking', 'uploading')
            RETURNING uploaded_count
            "#,
        )
        .bind(&now)
        .bind(chunk.file_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping the transaction rolls back the chunk insert
        let Some((uploaded,)) = uploaded else {
            return Err(TransferError::Internal(format!(
                "File {} is not accepting chunks",
                chunk.file_id
            )));
        };

        tx.commit().await?;
        Ok(uploaded as u64)
    }

    async fn complete_file(
        &self,
        file_id: Uuid,
        from: TransferStatus,
        file_hash: &str,
    ) -> Result<(), TransferError> {
        if !from.can_transition_to(TransferStatus::Completed) {
            return Err(TransferError::Internal(format!(
                "Illegal status transition {} -> completed",
                from
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE files SET status = 'completed', file_hash = ?, updated_at = ?
            WHERE id = ? AND status = ? AND uploaded_count = chunk_count
            "#,
        )
        .bind(file_hash)
        .bind(Utc::now().to_rfc3339())
        .bind(file_id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.guard_failure(file_id, from).await);
        }

        Ok(())
    }

    async fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, TransferError> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM files WHERE id = ?",
            FILE_COLUMNS
        ))
        .bind(file_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn chunk_listing(&self, file_id: Uuid) -> Result<Option<ChunkListing>, TransferError> {
        // Both reads inside one transaction so they see the same commit
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM files WHERE id = ?",
            FILE_COLUMNS
        ))
        .bind(file_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let file = FileRecord::try_from(row)?;

        let rows = sqlx::query_as::<_, ChunkRow>(&format!(
            "SELECT {} FROM chunks WHERE file_id = ? ORDER BY sequence_index",
            CHUNK_COLUMNS
        ))
        .bind(file_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let chunks = rows
            .into_iter()
            .map(ChunkRef::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let contiguous = chunks
            .iter()
            .enumerate()
            .all(|(i, c)| c.sequence_index == i as u64);
        let total: u64 = chunks.iter().map(|c| c.byte_size as u64).sum();

        if chunks.len() as u64 == file.chunk_count && contiguous && total == file.total_size {
            Ok(Some(ChunkListing::Complete { file, chunks }))
        } else {
            Ok(Some(ChunkListing::Incomplete {
                found: chunks.len() as u64,
                file,
            }))
        }
    }

    async fn chunk_refs(&self, file_id: Uuid) -> Result<Vec<ChunkRef>, TransferError> {
        let rows = sqlx::query_as::<_, ChunkRow>(&format!(
            "SELECT {} FROM chunks WHERE file_id = ? ORDER BY sequence_index",
            CHUNK_COLUMNS
        ))
        .bind(file_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChunkRef::try_from).collect()
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, TransferError> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM files ORDER BY created_at DESC",
            FILE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    async fn delete_file(&self, file_id: Uuid) -> Result<bool, TransferError> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_interrupted(&self) -> Result<u64, TransferError> {
        let result = sqlx::query(
            r#"
            UPDATE files SET status = 'failed', updated_at = ?
            WHERE status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<StoreStats, TransferError> {
        let (total_files, total_bytes, completed, failed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(total_size), 0),
                   COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
            FROM files
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total_files: total_files as u64,
            total_bytes: total_bytes as u64,
            completed: completed as u64,
            failed: failed as u64,
            in_progress: (total_files - completed - failed) as u64,
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, TransferError> {
    Uuid::parse_str(value).map_err(|e| TransferError::Database(format!("Bad id {}: {}", value, e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TransferError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TransferError::Database(format!("Bad timestamp {}: {}", value, e)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;

    async fn store() -> SqliteMetadataStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        SqliteMetadataStore::new(pool)
    }

    fn chunk(file_id: Uuid, index: u64, size: usize) -> ChunkRef {
        ChunkRef {
            file_id,
            sequence_index: index,
            remote_handle: RemoteHandle::new(format!("handle-{}", index)),
            content_hash: format!("hash-{}", index),
            byte_size: size,
        }
    }

    async fn uploading_file(store: &SqliteMetadataStore, size: u64, chunk_size: usize) -> FileRecord {
        let record = FileRecord::new("report.pdf", size, chunk_size);
        store.create_file(&record).await.unwrap();
        store
            .transition(record.id, TransferStatus::Initializing, TransferStatus::Chunking)
            .await
            .unwrap();
        store
            .transition(record.id, TransferStatus::Chunking, TransferStatus::Uploading)
            .await
            .unwrap();
        record
    }

    #[tokio::test]
    async fn test_create_and_get_file() {
        let store = store().await;
        let record = FileRecord::new("movie.mkv", 45, 20);
        store.create_file(&record).await.unwrap();

        let fetched = store.get_file(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.filename, "movie.mkv");
        assert_eq!(fetched.chunk_count, 3);
        assert_eq!(fetched.status, TransferStatus::Initializing);

        assert!(store.get_file(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_guarded() {
        let store = store().await;
        let record = FileRecord::new("a.bin", 10, 4);
        store.create_file(&record).await.unwrap();

        // Stored status is Initializing, not Chunking
        let result = store
            .transition(record.id, TransferStatus::Chunking, TransferStatus::Uploading)
            .await;
        assert!(matches!(result, Err(TransferError::Internal(_))));

        store
            .transition(record.id, TransferStatus::Initializing, TransferStatus::Failed)
            .await
            .unwrap();

        // Terminal states never move again
        let result = store
            .transition(record.id, TransferStatus::Failed, TransferStatus::Chunking)
            .await;
        assert!(matches!(result, Err(TransferError::Internal(_))));

        let missing = store
            .transition(Uuid::new_v4(), TransferStatus::Initializing, TransferStatus::Chunking)
            .await;
        assert!(matches!(missing, Err(TransferError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_record_chunk_increments_counter() {
        let store = store().await;
        let record = uploading_file(&store, 10, 4).await;

        assert_eq!(store.record_chunk(&chunk(record.id, 0, 4)).await.unwrap(), 1);
        assert_eq!(store.record_chunk(&chunk(record.id, 1, 4)).await.unwrap(), 2);

        let fetched = store.get_file(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.uploaded_count, 2);
        assert_eq!(store.chunk_refs(record.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_chunk_rolls_back_for_terminal_file() {
        let store = store().await;
        let record = uploading_file(&store, 10, 4).await;
        store
            .transition(record.id, TransferStatus::Uploading, TransferStatus::Failed)
            .await
            .unwrap();

        assert!(store.record_chunk(&chunk(record.id, 0, 4)).await.is_err());

        // Neither the ref nor the increment survived
        assert!(store.chunk_refs(record.id).await.unwrap().is_empty());
        assert_eq!(store.get_file(record.id).await.unwrap().unwrap().uploaded_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_index_rejected() {
        let store = store().await;
        let record = uploading_file(&store, 10, 4).await;

        store.record_chunk(&chunk(record.id, 0, 4)).await.unwrap();
        assert!(store.record_chunk(&chunk(record.id, 0, 4)).await.is_err());
        assert_eq!(store.get_file(record.id).await.unwrap().unwrap().uploaded_count, 1);
    }

    #[tokio::test]
    async fn test_chunk_listing_complete_and_incomplete() {
        let store = store().await;
        let record = uploading_file(&store, 10, 4).await;

        store.record_chunk(&chunk(record.id, 0, 4)).await.unwrap();
        store.record_chunk(&chunk(record.id, 2, 2)).await.unwrap();

        match store.chunk_listing(record.id).await.unwrap().unwrap() {
            ChunkListing::Incomplete { found, file } => {
                assert_eq!(found, 2);
                assert_eq!(file.chunk_count, 3);
            }
            other => panic!("expected incomplete listing, got {:?}", other),
        }

        store.record_chunk(&chunk(record.id, 1, 4)).await.unwrap();
        store
            .complete_file(record.id, TransferStatus::Uploading, "filehash")
            .await
            .unwrap();

        match store.chunk_listing(record.id).await.unwrap().unwrap() {
            ChunkListing::Complete { file, chunks } => {
                assert_eq!(file.status, TransferStatus::Completed);
                assert_eq!(file.file_hash.as_deref(), Some("filehash"));
                let indices: Vec<u64> = chunks.iter().map(|c| c.sequence_index).collect();
                assert_eq!(indices, vec![0, 1, 2]);
            }
            other => panic!("expected complete listing, got {:?}", other),
        }

        assert!(store.chunk_listing(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_requires_all_chunks() {
        let store = store().await;
        let record = uploading_file(&store, 10, 4).await;
        store.record_chunk(&chunk(record.id, 0, 4)).await.unwrap();

        let result = store
            .complete_file(record.id, TransferStatus::Uploading, "filehash")
            .await;
        assert!(result.is_err());
        assert_eq!(
            store.get_file(record.id).await.unwrap().unwrap().status,
            TransferStatus::Uploading
        );
    }

    #[tokio::test]
    async fn test_delete_cascades_to_chunks() {
        let store = store().await;
        let record = uploading_file(&store, 10, 4).await;
        store.record_chunk(&chunk(record.id, 0, 4)).await.unwrap();

        assert!(store.delete_file(record.id).await.unwrap());
        assert!(store.get_file(record.id).await.unwrap().is_none());
        assert!(store.chunk_refs(record.id).await.unwrap().is_empty());
        assert!(!store.delete_file(record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = store().await;
        let done = uploading_file(&store, 4, 4).await;
        store.record_chunk(&chunk(done.id, 0, 4)).await.unwrap();
        store
            .complete_file(done.id, TransferStatus::Uploading, "h")
            .await
            .unwrap();

        let failed = uploading_file(&store, 6, 4).await;
        store
            .transition(failed.id, TransferStatus::Uploading, TransferStatus::Failed)
            .await
            .unwrap();

        uploading_file(&store, 100, 4).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_bytes, 110);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(store.list_files().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fail_interrupted_only_touches_running_records() {
        let store = store().await;
        let done = uploading_file(&store, 4, 4).await;
        store.record_chunk(&chunk(done.id, 0, 4)).await.unwrap();
        store
            .complete_file(done.id, TransferStatus::Uploading, "h")
            .await
            .unwrap();

        let pending = FileRecord::new("pending.bin", 8, 4);
        store.create_file(&pending).await.unwrap();
        let running = uploading_file(&store, 8, 4).await;

        assert_eq!(store.fail_interrupted().await.unwrap(), 2);

        let status = |file: Option<FileRecord>| file.unwrap().status;
        assert_eq!(status(store.get_file(done.id).await.unwrap()), TransferStatus::Completed);
        assert_eq!(status(store.get_file(pending.id).await.unwrap()), TransferStatus::Failed);
        assert_eq!(status(store.get_file(running.id).await.unwrap()), TransferStatus::Failed);

        assert_eq!(store.fail_interrupted().await.unwrap(), 0);
    }
}
