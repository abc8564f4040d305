//! Transfer Status Tracker
//!
//! Answers status queries for running and finished transfers. Running
//! uploads publish a snapshot after every committed chunk; once an upload
//! reaches a terminal state its entry is dropped and queries fall through
//! to the metadata store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::db::MetadataStore;

use super::types::{StatusSnapshot, TransferError};

#[derive(Clone)]
pub struct StatusTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    live: RwLock<HashMap<Uuid, StatusSnapshot>>,
    metadata: Arc<dyn MetadataStore>,
}

impl StatusTracker {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                live: RwLock::new(HashMap::new()),
                metadata,
            }),
        }
    }

    /// Publish committed progress. Terminal snapshots retire the entry.
    pub fn publish(&self, snapshot: StatusSnapshot) {
        let mut live = self.inner.live.write();

        if snapshot.status.is_terminal() {
            live.remove(&snapshot.file_id);
            return;
        }

        match live.get(&snapshot.file_id) {
            // Never move a reader backwards
            Some(current) if current.uploaded_count > snapshot.uploaded_count => {}
            _ => {
                live.insert(snapshot.file_id, snapshot);
            }
        }
    }

    pub fn retire(&self, file_id: Uuid) {
        self.inner.live.write().remove(&file_id);
    }

    /// Latest committed state of a transfer
    pub async fn query(&self, file_id: Uuid) -> Result<StatusSnapshot, TransferError> {
        let live = self.inner.live.read().get(&file_id).copied();
        if let Some(snapshot) = live {
            return Ok(snapshot);
        }

        match self.inner.metadata.get_file(file_id).await? {
            Some(file) => Ok(file.snapshot()),
            None => Err(TransferError::FileNotFound(file_id)),
        }
    }

    /// Number of uploads currently running in this process
    pub fn active(&self) -> usize {
        self.inner.live.read().len()
    }
}
