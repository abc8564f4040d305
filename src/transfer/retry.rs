//! Bounded retry for remote chunk calls
//!
//! Every attempt runs under a timeout; timeouts and `Unavailable` errors are
//! retried with jittered exponential backoff, anything else fails at once.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::jitter;
use tokio_retry::RetryIf;

use crate::config::TransferConfig;
use crate::storage::RemoteError;

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
            timeout,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(
            config.retry_max_attempts,
            config.retry_base_delay,
            config.remote_timeout,
        )
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delays between attempts: base, 2*base, 4*base ... capped, with jitter
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let base = self.base_delay;
        let max = self.max_delay;
        (0..self.max_attempts as u32 - 1)
            .map(move |i| base.saturating_mul(1 << i.min(16)).min(max))
            .map(jitter)
    }

    /// Run `attempt` until it succeeds, fails permanently, or the budget is spent
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let timeout = self.timeout;
        let max_attempts = self.max_attempts;
        let mut tries = 0usize;

        let action = || {
            tries += 1;
            let try_idx = tries;
            let call = attempt();
            async move {
                let result = match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Unavailable(format!(
                        "{} timed out after {:?}",
                        operation, timeout
                    ))),
                };

                if let Err(e) = &result {
                    tracing::warn!(
                        operation,
                        attempt = try_idx,
                        max_attempts,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Remote call failed"
                    );
                }

                result
            }
        };

        RetryIf::start(self.delays(), action, RemoteError::is_retryable).await
    }
}

// ============================================================================
// Tests
// ============================================================================
