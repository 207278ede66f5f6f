//! Bounded retry with a fixed delay.
//!
//! Each attempt runs under its own timeout. The first successful attempt
//! ends the loop; a timed-out attempt counts as a failed one.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::MonitorConfig;

/// Retry settings for one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay())
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `label` names the target in logs and timeout errors. Returns the last
    /// error when every attempt fails.
    pub async fn run<T, F, Fut>(&self, label: &str, timeout: Duration, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            let result = match tokio::time::timeout(timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::ExtractionTimeout {
                    target: label.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{}: succeeded on attempt {}/{}", label, attempt, self.attempts);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    log::warn!(
                        "{}: attempt {}/{} failed: {}",
                        label,
                        attempt,
                        self.attempts,
                        error
                    );
                    last_error = Some(error);
                }
            }

            if attempt < self.attempts && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::extraction(label, "no attempts made")))
    }
}
