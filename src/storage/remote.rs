//! Remote chunk stores
//!
//! Opaque push/pull/delete of chunk payloads. Every backend is cheap to clone
//! and keeps no per-request state, so one handle can be shared between the
//! upload task and any number of download streams.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use uuid::Uuid;

use super::s3_client::S3Client;
use super::types::{RemoteError, RemoteHandle};

// ============================================================================
// Remote Store Trait
// ============================================================================

/// Trait for remote chunk storage backends
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store a chunk, returning the handle needed to fetch it again
    async fn push(&self, data: Bytes) -> Result<RemoteHandle, RemoteError>;

    /// Fetch a chunk by handle
    async fn pull(&self, handle: &RemoteHandle) -> Result<Bytes, RemoteError>;

    /// Remove a chunk (best-effort: callers log and move on)
    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError>;

    /// Check that the backend is reachable
    async fn probe(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

// ============================================================================
// S3 Storage
// ============================================================================

/// S3-based chunk storage
#[derive(Clone)]
pub struct S3RemoteStore {
    client: S3Client,
    prefix: String,
}

impl S3RemoteStore {
    pub fn new(client: S3Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn chunk_key(&self, id: Uuid) -> String {
        let id = id.simple().to_string();
        format!("{}/{}/{}.chunk", self.prefix.trim_end_matches('/'), &id[..2], id)
    }
}

#[async_trait::async_trait]
impl RemoteStore for S3RemoteStore {
    async fn push(&self, data: Bytes) -> Result<RemoteHandle, RemoteError> {
        let key = self.chunk_key(Uuid::new_v4());
        self.client
            .put_object(&key, data, "application/octet-stream")
            .await?;
        Ok(RemoteHandle::new(key))
    }

    async fn pull(&self, handle: &RemoteHandle) -> Result<Bytes, RemoteError> {
        self.client.get_object(handle.as_str()).await
    }

    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError> {
        self.client.delete_object(handle.as_str()).await
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        self.client.head_bucket().await
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage
#[derive(Clone)]
pub struct LocalRemoteStore {
    base_path: PathBuf,
}

impl LocalRemoteStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn chunk_path(&self, handle: &RemoteHandle) -> Result<PathBuf, RemoteError> {
        // Handles are "<2 hex>/<32 hex>.chunk"; anything else never came from push
        let valid = handle
            .as_str()
            .split('/')
            .all(|part| !part.is_empty() && part != ".." && part != ".");
        if !valid || handle.as_str().starts_with('/') {
            return Err(RemoteError::Rejected(format!("Malformed chunk handle: {}", handle)));
        }
        Ok(self.base_path.join(handle.as_str()))
    }
}

#[async_trait::async_trait]
impl RemoteStore for LocalRemoteStore {
    async fn push(&self, data: Bytes) -> Result<RemoteHandle, RemoteError> {
        let id = Uuid::new_v4().simple().to_string();
        let handle = RemoteHandle::new(format!("{}/{}.chunk", &id[..2], id));
        let path = self.chunk_path(&handle)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        }

        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| RemoteError::Unavailable(format!("Failed to write chunk: {}", e)))?;

        Ok(handle)
    }

    async fn pull(&self, handle: &RemoteHandle) -> Result<Bytes, RemoteError> {
        let path = self.chunk_path(handle)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(handle.to_string()))
            }
            Err(e) => Err(RemoteError::Unavailable(format!("Failed to read chunk: {}", e))),
        }
    }

    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError> {
        let path = self.chunk_path(handle)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(handle.to_string()))
            }
            Err(e) => Err(RemoteError::Unavailable(e.to_string())),
        }
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| RemoteError::Unavailable(format!("Chunk directory unusable: {}", e)))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// Process-local chunk storage, for development and tests
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    objects: Arc<RwLock<HashMap<RemoteHandle, Bytes>>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Overwrite a stored chunk in place
    pub fn replace(&self, handle: &RemoteHandle, data: Bytes) -> bool {
        match self.objects.write().get_mut(handle) {
            Some(slot) => {
                *slot = data;
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn push(&self, data: Bytes) -> Result<RemoteHandle, RemoteError> {
        let handle = RemoteHandle::new(Uuid::new_v4().to_string());
        self.objects.write().insert(handle.clone(), data);
        Ok(handle)
    }

    async fn pull(&self, handle: &RemoteHandle) -> Result<Bytes, RemoteError> {
        self.objects
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(handle.to_string()))
    }

    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError> {
        self.objects
            .write()
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(handle.to_string()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
