//! Bounded exponential backoff and deadline wrappers
//!
//! `retry_with_backoff` retries operations whose failures classify as
//! transient; `with_timeout` races a future against a deadline. Both are
//! plain futures, so callers can cancel them by dropping or racing them
//! in a `select!`.

use crate::error::{Error, ErrorCode, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryOptions {
    /// Pre-jitter delay for a 1-based attempt number:
    /// `initial * multiplier^(attempt-1)`, clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = self.initial_delay.as_millis() as f64 * exp;
        Duration::from_millis(ms as u64).min(self.max_delay)
    }

    fn sleep_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter {
            // Uniform factor in [0.5, 1.5)
            let factor = 0.5 + fastrand::f64();
            Duration::from_millis((base.as_millis() as f64 * factor) as u64)
        } else {
            base
        }
    }
}

/// Invoke `op(attempt)` (1-based) up to `max_attempts` times, sleeping
/// between failures that `is_retryable` accepts. Non-retryable failures
/// and the final attempt's failure are returned as-is.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    opts: &RetryOptions,
    is_retryable: P,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < opts.max_attempts && is_retryable(&err) => {
                let delay = opts.sleep_for_attempt(attempt);
                debug!(
                    "transient failure on attempt {}/{}, retrying in {:?}: {}",
                    attempt, opts.max_attempts, delay, err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// HTTP statuses worth retrying: request timeout, rate limit, server errors.
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

/// Connection-level error codes worth retrying, including the codes
/// surfaced by undici-style HTTP stacks behind gateways.
pub fn is_transient_io_code(code: &str) -> bool {
    matches!(
        code,
        "ECONNRESET"
            | "ETIMEDOUT"
            | "ECONNREFUSED"
            | "EAI_AGAIN"
            | "ENOTFOUND"
            | "UND_ERR_CONNECT_TIMEOUT"
            | "UND_ERR_HEADERS_TIMEOUT"
            | "UND_ERR_BODY_TIMEOUT"
            | "UND_ERR_SOCKET"
    )
}

/// Message-text fallback for errors that lost their structure upstream.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "timeout",
        "timed out",
        "rate limit",
        "temporarily unavailable",
        "fetch failed",
        "network",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Race `fut` against a deadline. On expiry the result is
/// `Error::Timeout { label, code }`; on completion the timer is dropped.
pub async fn with_timeout<T, F>(
    fut: F,
    timeout: Duration,
    label: &str,
    code: ErrorCode,
) -> Result<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(value) => Ok(value),
        Err(_) => Err(Error::timeout(label, code)),
    }
}
