//! Retry policy for artifact-level provider operations.
//!
//! Transient failures (timeouts, rate limits, 5xx-class errors) are
//! retried with capped exponential backoff plus jitter. Validation and
//! field errors are deterministic and never retried. Everything else is
//! fatal and escalates to the orchestrator's error-handling strategy.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::MigrationConfig;
use crate::error::{ErrorClass, MigrateError, Result};
use crate::progress::{LogLevel, RunJournal};

/// Bounded exponential backoff retry wrapper.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retries).
    pub attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Build the policy from the run configuration.
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Run `op`, retrying transient failures up to `attempts` times.
    ///
    /// Each retry is journaled at `warn`; exhaustion at `error`, after
    /// which the last transient error is promoted to fatal.
    pub async fn execute<T, F, Fut>(
        &self,
        component: &str,
        journal: &RunJournal,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match e.class() {
                    ErrorClass::Transient if attempt < self.attempts => {
                        let delay = self.backoff_delay(attempt);
                        journal.record(
                            LogLevel::Warn,
                            component,
                            format!(
                                "attempt {} failed, retrying in {}ms: {}",
                                attempt + 1,
                                delay.as_millis(),
                                e
                            ),
                            None,
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    ErrorClass::Transient => {
                        journal.record(
                            LogLevel::Error,
                            component,
                            format!("retries exhausted after {} attempts: {}", attempt + 1, e),
                            None,
                        );
                        return Err(MigrateError::fatal(format!("retries exhausted: {}", e)));
                    }
                    ErrorClass::NeverRetry | ErrorClass::Fatal => return Err(e),
                },
            }
        }
    }

    /// Delay before retry number `attempt` (zero-based): base doubled per
    /// attempt, capped, plus up to 25% uniform jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        let jitter_cap = exp.as_millis() as u64 / 4;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };
        (exp + Duration::from_millis(jitter)).min(self.max_delay)
    }
}
