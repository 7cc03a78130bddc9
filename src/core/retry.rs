//! Retry logic with exponential backoff
//!
//! Remote publish and grant calls are retried through [`RetryManager`]. The
//! caller decides which errors are worth another attempt.

use crate::core::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Options for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay before first retry
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Maximum delay between retries
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Final result of a retried operation together with the attempts spent
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Retry manager for executing operations with exponential backoff
pub struct RetryManager {
    options: RetryOptions,
}

impl RetryManager {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Retry `operation` while it fails with a retryable [`PipelineError`]
    pub async fn retry<F, Fut, T>(&self, operation: F) -> Retried<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        self.retry_if(operation, PipelineError::is_retryable).await
    }

    /// Execute the given async operation, retrying failures accepted by
    /// `should_retry` until `max_attempts` is reached
    pub async fn retry_if<F, Fut, T, E, P>(&self, mut operation: F, should_retry: P) -> Retried<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.options.max_attempts.max(1);
        let max_delay = self.options.max_delay;
        let mut delay = self.options.initial_delay.min(max_delay);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    if attempt >= max_attempts || !should_retry(&error) {
                        return Retried {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }

                    warn!(attempt, delay_ms = delay.as_millis() as u64, %error, "retrying after transient failure");
                    sleep(delay).await;

                    // Negative, NaN or overflowing products fall back to the ceiling
                    delay = Duration::try_from_secs_f64(
                        delay.as_secs_f64() * self.options.backoff_multiplier,
                    )
                    .unwrap_or(max_delay)
                    .min(max_delay);
                    attempt += 1;
                }
            }
        }
    }
}
