//! Chunk Splitter
//!
//! Reads an async byte source in fixed-size pieces, hashing each piece
//! before it leaves the process.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::{chunk_count, chunk_len, TransferError};

/// One chunk ready for transmission
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u64,
    pub data: Bytes,
    /// Hex SHA-256 of `data`
    pub hash: String,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Forward-only splitter over a source of known size.
///
/// Not restartable: once a chunk has been handed out it cannot be re-read,
/// and once a read has failed every later call fails too.
pub struct ChunkSplitter<R> {
    reader: R,
    total_size: u64,
    chunk_size: usize,
    next_index: u64,
    file_hasher: Sha256,
    failed: bool,
}

impl<R: AsyncRead + Unpin> ChunkSplitter<R> {
    pub fn new(reader: R, total_size: u64, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            reader,
            total_size,
            chunk_size,
            next_index: 0,
            file_hasher: Sha256::new(),
            failed: false,
        }
    }

    /// Total chunks this source yields
    pub fn chunk_count(&self) -> u64 {
        chunk_count(self.total_size, self.chunk_size)
    }

    /// Read the next chunk, or `None` once `total_size` bytes have been produced
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.failed {
            return Err(TransferError::SourceRead("split already aborted".to_string()));
        }

        let Some(len) = chunk_len(self.total_size, self.chunk_size, self.next_index) else {
            return Ok(None);
        };

        let mut buf = BytesMut::zeroed(len);
        if let Err(e) = self.reader.read_exact(&mut buf).await {
            self.failed = true;
            let offset = self.next_index * self.chunk_size as u64;
            return Err(TransferError::SourceRead(format!(
                "chunk {} at offset {}: {}",
                self.next_index, offset, e
            )));
        }

        let data = buf.freeze();
        self.file_hasher.update(&data);

        let chunk = Chunk {
            index: self.next_index,
            hash: compute_hash(&data),
            data,
        };
        self.next_index += 1;

        Ok(Some(chunk))
    }

    /// Whole-file hash, available once every chunk has been read
    pub fn file_hash(&self) -> Option<String> {
        if self.failed || self.next_index < self.chunk_count() {
            return None;
        }
        Some(hex::encode(self.file_hasher.clone().finalize()))
    }

    /// Consume the splitter as a lazy stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<Chunk, TransferError>> {
        futures::stream::try_unfold(self, |mut splitter| async move {
            let next = splitter.next_chunk().await?;
            Ok::<_, TransferError>(next.map(|chunk| (chunk, splitter)))
        })
    }
}

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify hash matches data
pub fn verify_hash(data: &[u8], expected_hash: &str) -> bool {
    compute_hash(data) == expected_hash
}

// ============================================================================
// Tests
// ============================================================================
