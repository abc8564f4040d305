//! Storage types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier returned by a remote store for a pushed chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(String);

impl RemoteHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Transient: network trouble, timeouts, throttling, 5xx
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Permanent: the backend refused the request
    #[error("Remote store rejected request: {0}")]
    Rejected(String),

    #[error("Remote object not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
