//! Bounded retry of blocking native calls.
//!
//! A native call is retried on the worker that runs it, so backoff sleeps
//! only ever block that worker. The attempt counter is capped: once it is
//! exhausted the last observed outcome is returned as-is.

use std::time::Duration;

use tracing::warn;

use crate::config::DEFAULT_RETRY_ATTEMPTS;
use crate::metrics::MetricsSink;

/// Classification of one attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Terminal success: stop and return.
    Success,
    /// Transient failure: try again if attempts remain.
    Retry,
    /// Terminal failure: stop and return.
    Fail,
}

/// How often and how patiently to retry.
///
/// # Defaults
///
/// ```text
/// max_attempts: 6 (1 initial + 5 retries)
/// base_delay:   5ms, doubled after every retry
/// max_delay:    1s
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Total attempts including the first. `0` is treated as `1`.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the exponential delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Retries up to `max_attempts` times without sleeping in between.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Same policy with a different attempt cap.
    pub const fn with_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// Effective attempt cap (never below one).
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Repeats `call` until `classify` accepts its outcome or attempts run out.
///
/// `classify` is evaluated afresh on every attempt. Each retry is logged and
/// counted under `<name>.retries`; the sink never influences the result.
///
/// # Example
///
/// ```rust
/// use storage_helpers::{with_retry, NoopMetrics, RetryPolicy, Verdict};
///
/// let mut calls = 0;
/// let out = with_retry(
///     &RetryPolicy::immediate(3),
///     "example",
///     &NoopMetrics,
///     || {
///         calls += 1;
///         calls
///     },
///     |n| if *n < 2 { Verdict::Retry } else { Verdict::Success },
/// );
/// assert_eq!(out, 2);
/// ```
pub fn with_retry<T>(
    policy: &RetryPolicy,
    name: &str,
    metrics: &dyn MetricsSink,
    mut call: impl FnMut() -> T,
    mut classify: impl FnMut(&T) -> Verdict,
) -> T {
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        let outcome = call();
        match classify(&outcome) {
            Verdict::Success | Verdict::Fail => return outcome,
            Verdict::Retry if attempt >= attempts => return outcome,
            Verdict::Retry => {
                warn!(operation = name, attempt, "retrying storage operation");
                metrics.counter_inc(&format!("{name}.retries"));
                let delay = policy.delay(attempt);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

/// [`with_retry`] specialised to `Result`: errors accepted by `is_retryable`
/// are retried, everything else ends the loop.
pub fn retry_call<T, E>(
    policy: &RetryPolicy,
    name: &str,
    metrics: &dyn MetricsSink,
    is_retryable: impl Fn(&E) -> bool,
    call: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    with_retry(policy, name, metrics, call, |outcome| match outcome {
        Ok(_) => Verdict::Success,
        Err(e) if is_retryable(e) => Verdict::Retry,
        Err(_) => Verdict::Fail,
    })
}
