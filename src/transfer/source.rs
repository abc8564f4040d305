//! Upload sources
//!
//! A readable byte source of known size. Request bodies are staged to a
//! temporary file first so the size is known before chunking starts; the
//! staged file is removed when the source is dropped, whichever way the
//! upload ends.

use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

use super::types::TransferError;

/// Byte source handed to the upload orchestrator
pub struct UploadSource {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    size: u64,
    _staged: StagedFile,
}

impl UploadSource {
    /// Wrap an arbitrary reader that yields exactly `size` bytes
    pub fn from_reader<R>(reader: R, size: u64) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            size,
            _staged: StagedFile(None),
        }
    }

    /// In-memory source
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let size = data.len() as u64;
        Self::from_reader(std::io::Cursor::new(data), size)
    }

    /// Source backed by a staged temp file, deleted when the source drops
    pub async fn from_staged_file(path: TempPath, size: u64) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| TransferError::SourceRead(format!("staged upload: {}", e)))?;

        Ok(Self {
            reader: Box::pin(file),
            size,
            _staged: StagedFile(Some(path)),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl AsyncRead for UploadSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

/// Removes the staged file on drop
struct StagedFile(Option<TempPath>);

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => tracing::debug!(path = %shown, "Removed staged upload"),
                Err(e) => tracing::warn!(path = %shown, error = %e, "Failed to remove staged upload"),
            }
        }
    }
}

/// Write a request body to a temp file under `temp_dir`.
///
/// Enforces `max_size` (0 = unlimited) while streaming, so oversized bodies
/// are cut off without being written in full.
pub async fn stage_body<S, E>(
    temp_dir: &Path,
    body: S,
    max_size: u64,
) -> Result<UploadSource, TransferError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);

    tokio::fs::create_dir_all(temp_dir)
        .await
        .map_err(|e| TransferError::Internal(format!("Failed to create temp dir: {}", e)))?;

    let staged = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".part")
        .tempfile_in(temp_dir)
        .map_err(|e| TransferError::Internal(format!("Failed to create temp file: {}", e)))?;

    // `path` deletes the file if we bail out below
    let (file, path) = staged.into_parts();
    let mut file = tokio::fs::File::from_std(file);
    let mut size = 0u64;

    while let Some(piece) = body.next().await {
        let piece = piece.map_err(|e| TransferError::SourceRead(format!("request body: {}", e)))?;

        size += piece.len() as u64;
        if max_size > 0 && size > max_size {
            return Err(TransferError::FileTooLarge { size, max: max_size });
        }

        file.write_all(&piece)
            .await
            .map_err(|e| TransferError::Internal(format!("Failed to stage upload: {}", e)))?;
    }

    file.flush()
        .await
        .map_err(|e| TransferError::Internal(format!("Failed to stage upload: {}", e)))?;
    drop(file);

    tracing::debug!("Staged {} byte upload at {}", size, path.display());
    UploadSource::from_staged_file(path, size).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn body(pieces: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures::stream::iter(pieces.iter().map(|p| Ok(Bytes::from_static(*p))).collect::<Vec<_>>())
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_stage_body_and_cleanup_on_drop() {
        let dir = tempfile::tempdir().unwrap();

        let mut source = stage_body(dir.path(), body(&[b"hello ", b"world"]), 0)
            .await
            .unwrap();
        assert_eq!(source.size(), 11);
        assert_eq!(staged_files(dir.path()), 1);

        let mut contents = Vec::new();
        source.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"hello world");

        drop(source);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_and_removed() {
        let dir = tempfile::tempdir().unwrap();

        let result = stage_body(dir.path(), body(&[b"0123456789", b"abc"]), 12).await;
        assert!(matches!(result, Err(TransferError::FileTooLarge { max: 12, .. })));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_broken_body_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let pieces: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ];

        let result = stage_body(dir.path(), futures::stream::iter(pieces), 0).await;
        assert!(matches!(result, Err(TransferError::SourceRead(_))));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_from_bytes() {
        let mut source = UploadSource::from_bytes(vec![1u8, 2, 3]);
        assert_eq!(source.size(), 3);

        let mut contents = Vec::new();
        source.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, vec![1, 2, 3]);
    }
}
