//! Bounded retry with exponential backoff
//!
//! Used for service-manager calls, where a restart request can fail
//! transiently (the manager is busy with the previous restart) or
//! permanently (the service is not registered at all).

use log::{debug, warn};
use rand::random;
use serde::Deserialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{Result, SupervisorError};

/// Configuration for retry behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: usize,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,

    /// Upper bound for the backoff delay in milliseconds
    pub max_delay_ms: u64,

    /// Add up to 100ms of random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Jitter-free config with a constant delay
    pub fn fixed(max_attempts: usize, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: delay_ms,
            backoff_factor: 1.0,
            max_delay_ms: delay_ms,
            jitter: false,
        }
    }

    /// Delay before retry number `retry`, counting from 1
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0) as u64;
        let jitter = if self.jitter { random::<u64>() % 100 } else { 0 };
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is used up
pub async fn execute_with_retry<F, Fut, T, E>(
    operation: F,
    config: RetryConfig,
    context: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    execute_with_retry_if(operation, config, context, |_| true).await
}

/// Like [`execute_with_retry`], but gives up at once on errors `is_transient` rejects
pub async fn execute_with_retry_if<F, Fut, T, E, P>(
    operation: F,
    config: RetryConfig,
    context: &str,
    is_transient: P,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", context, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_transient(&err) {
            warn!("{} failed permanently: {}", context, err);
            return Err(SupervisorError::retry(context, attempt, err).into());
        }
        if attempt >= max_attempts {
            return Err(SupervisorError::retry(context, attempt, err).into());
        }

        let delay = config.backoff(attempt as u32);
        warn!(
            "{} (attempt {}/{}): {}; retrying in {:?}",
            context, attempt, max_attempts, err, delay
        );
        sleep(delay).await;
    }
}
