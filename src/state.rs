//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{MetadataStore, SqliteMetadataStore};
use crate::storage::RemoteStore;
use crate::transfer::TransferService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    transfers: TransferService,
}

impl AppState {
    /// Create a new application state over a SQLite pool and a remote store
    pub fn new(config: Config, remote: Arc<dyn RemoteStore>, db: SqlitePool) -> Self {
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(db));
        let transfers = TransferService::new(metadata, remote, &config.transfer);
        Self::from_parts(config, transfers)
    }

    pub fn from_parts(config: Config, transfers: TransferService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, transfers }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the transfer service
    pub fn transfers(&self) -> &TransferService {
        &self.inner.transfers
    }
}
