//! Storage module for remote chunk backends
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2 and AWS S3, plus a local
//! filesystem and an in-memory store for development.

mod remote;
mod s3_client;
mod types;

pub use remote::{LocalRemoteStore, MemoryRemoteStore, RemoteStore, S3RemoteStore};
pub use s3_client::S3Client;
pub use types::*;

use std::sync::Arc;

use crate::config::{StorageConfig, StorageProvider};
use crate::error::Result;

/// Build the configured remote store
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn RemoteStore>> {
    let store: Arc<dyn RemoteStore> = match config.provider {
        StorageProvider::Local => {
            tokio::fs::create_dir_all(&config.local_path).await?;
            tracing::info!("Local chunk store at {}", config.local_path.display());
            Arc::new(LocalRemoteStore::new(config.local_path.clone()))
        }
        StorageProvider::Memory => {
            tracing::warn!("Using in-memory chunk store; chunks are lost on restart");
            Arc::new(MemoryRemoteStore::new())
        }
        _ => {
            tracing::info!("S3 endpoint: {}", config.endpoint);
            tracing::info!("S3 bucket: {}", config.bucket);
            let client = S3Client::new(config).await?;
            Arc::new(S3RemoteStore::new(client, config.chunk_prefix.clone()))
        }
    };

    Ok(store)
}
