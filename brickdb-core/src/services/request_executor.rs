//! Resilient request execution
//!
//! Every remote call of a source goes through one `RequestExecutor`.
//!
//! **Algorithm:**
//! 1. Attempt the action
//! 2. If successful, return the result
//! 3. If the failure is retryable (400, 401, 5xx):
//!    a. log WARN, emit `RetryScheduled`, sleep `budget / attempts`
//!    b. before the final attempt, reset the transport session
//! 4. Any other failure is returned immediately
//! 5. After the last failed attempt: cool down, reset the session again and
//!    return the last error

use crate::error::RequestError;
use crate::types::Transport;
use brickdb_common::config::RetryConfig;
use brickdb_common::{time, CacheEvent, EventBus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Attempt count and waits for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub per_attempt_delay: Duration,
    pub cooldown: Duration,
}

impl RetryPolicy {
    /// Spreads `budget` evenly over `attempts` (at least one attempt)
    pub fn new(attempts: u32, budget: Duration, cooldown: Duration) -> Self {
        let attempts = attempts.max(1);
        Self {
            attempts,
            per_attempt_delay: budget / attempts,
            cooldown,
        }
    }

    /// No waiting at all; for tests and local sources
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.attempts, config.per_attempt_delay(), config.cooldown())
    }
}

/// Runs transport calls under a retry policy
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    events: EventBus,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, events: EventBus) -> Self {
        Self {
            transport,
            policy,
            events,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// GET a page as text
    pub async fn download_text(&self, operation: &str, url: &str) -> Result<String, RequestError> {
        let transport = &self.transport;
        self.execute(operation, || transport.download_text(url)).await
    }

    /// GET a resource as raw bytes
    pub async fn download_bytes(
        &self,
        operation: &str,
        url: &str,
    ) -> Result<Vec<u8>, RequestError> {
        let transport = &self.transport;
        self.execute(operation, || transport.download_bytes(url)).await
    }

    /// Run `action` until it succeeds, fails permanently, or attempts run out
    ///
    /// # Arguments
    /// * `operation` - Name for logging and events (e.g. "design page")
    /// * `action` - Async closure performing one attempt
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut action: F) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 && attempt == attempts {
                self.reset_session(operation);
            }

            match action().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        operation,
                        attempt,
                        attempts,
                        error = %err,
                        "Transient request failure"
                    );
                    if attempt < attempts {
                        self.events.emit_lossy(CacheEvent::RetryScheduled {
                            operation: operation.to_string(),
                            attempt,
                            status: err.status(),
                            timestamp: time::now(),
                        });
                        tokio::time::sleep(self.policy.per_attempt_delay).await;
                    }
                    last_error = Some(err);
                }
                Err(err) => {
                    debug!(operation, attempt, error = %err, "Permanent request failure");
                    return Err(err);
                }
            }
        }

        error!(
            operation,
            attempts,
            cooldown_ms = self.policy.cooldown.as_millis() as u64,
            "Request failed after all attempts, cooling down"
        );
        self.events.emit_lossy(CacheEvent::CooldownStarted {
            operation: operation.to_string(),
            cooldown_ms: self.policy.cooldown.as_millis() as u64,
            timestamp: time::now(),
        });
        tokio::time::sleep(self.policy.cooldown).await;
        self.reset_session(operation);

        Err(last_error.unwrap_or_else(|| RequestError::Connection {
            url: operation.to_string(),
            message: "no attempt was made".to_string(),
        }))
    }

    fn reset_session(&self, operation: &str) {
        debug!(operation, "Resetting transport session");
        self.transport.reset();
        self.events.emit_lossy(CacheEvent::SessionReset {
            operation: operation.to_string(),
            timestamp: time::now(),
        });
    }
}
