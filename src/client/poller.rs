//! Status polling client
//!
//! Polls a transfer's status on a fixed interval until it reaches a terminal
//! state. Transport failures are tolerated up to a budget of consecutive
//! misses; the server-side record is never touched by the poller.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::PollConfig;
use crate::transfer::{StatusReport, StatusTracker, TransferError};

/// Why a single poll produced no report
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("Status request failed: {0}")]
    Transport(String),

    #[error("Transfer not found")]
    NotFound,
}

/// Where status reports come from
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, file_id: Uuid) -> Result<StatusReport, PollError>;
}

/// Polls the status endpoint of a running server
#[derive(Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn status_url(&self, file_id: Uuid) -> String {
        format!("{}/api/v1/files/{}/status", self.base_url, file_id)
    }
}

#[async_trait::async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, file_id: Uuid) -> Result<StatusReport, PollError> {
        let response = self
            .client
            .get(self.status_url(file_id))
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PollError::NotFound);
        }

        let response = response
            .error_for_status()
            .map_err(|e| PollError::Transport(e.to_string()))?;

        response
            .json::<StatusReport>()
            .await
            .map_err(|e| PollError::Transport(format!("bad status body: {}", e)))
    }
}

#[async_trait::async_trait]
impl StatusSource for StatusTracker {
    async fn fetch(&self, file_id: Uuid) -> Result<StatusReport, PollError> {
        match self.query(file_id).await {
            Ok(snapshot) => Ok(snapshot.into()),
            Err(TransferError::FileNotFound(_)) => Err(PollError::NotFound),
            Err(e) => Err(PollError::Transport(e.to_string())),
        }
    }
}

/// Shortest interval the poller will tick at
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    failure_budget: u32,
}

impl StatusPoller {
    pub fn new(source: Arc<dyn StatusSource>, interval: Duration, failure_budget: u32) -> Self {
        Self {
            source,
            interval: interval.max(MIN_POLL_INTERVAL),
            failure_budget,
        }
    }

    pub fn from_config(source: Arc<dyn StatusSource>, config: &PollConfig) -> Self {
        Self::new(source, config.interval, config.failure_budget)
    }

    /// Poll until the transfer is Completed or Failed.
    ///
    /// `on_update` sees every successful report. Gives up with
    /// `ConnectionLost` once consecutive failures exceed the budget.
    pub async fn wait_for_terminal<F>(
        &self,
        file_id: Uuid,
        mut on_update: F,
    ) -> Result<StatusReport, TransferError>
    where
        F: FnMut(&StatusReport) + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            ticker.tick().await;

            match self.source.fetch(file_id).await {
                Ok(report) => {
                    failures = 0;
                    on_update(&report);
                    if report.status.is_terminal() {
                        return Ok(report);
                    }
                }
                Err(PollError::NotFound) => return Err(TransferError::FileNotFound(file_id)),
                Err(PollError::Transport(e)) => {
                    failures += 1;
                    tracing::warn!(
                        file_id = %file_id,
                        failures,
                        budget = self.failure_budget,
                        error = %e,
                        "Status poll failed"
                    );

                    if failures > self.failure_budget {
                        return Err(TransferError::ConnectionLost {
                            consecutive_failures: failures,
                        });
                    }
                }
            }
        }
    }
}
