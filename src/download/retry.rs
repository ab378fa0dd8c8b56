//! Retry logic with capped linear backoff for transient fetch failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying fetch errors and deciding whether another attempt in the
//! current tier is worth making.
//!
//! # Overview
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - connection errors, timeouts, 5xx, undersized bodies, write errors
//! - [`FailureType::RateLimited`] - HTTP 429, honours `Retry-After`
//! - [`FailureType::Forbidden`] - HTTP 403, retried until the tier's final attempt
//! - [`FailureType::Permanent`] - other 4xx, invalid input, render timeouts
//!
//! The [`RetryPolicy`] then decides whether to retry based on failure type,
//! attempt count and how much of the tier's wait budget has been spent.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mediafetch_core::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/a.jpg", 503);
//!
//! match policy.should_retry(classify_error(&error), 1, Duration::ZERO, None) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per tier.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for linear backoff (500 ms).
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default cap on a single computed backoff (10 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default ceiling on the total time spent waiting within one tier.
const DEFAULT_WAIT_CEILING: Duration = Duration::from_secs(10);

/// Default maximum jitter added to computed delays (300 ms).
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(300);

/// Classification of fetch failure types.
///
/// Used to decide whether a failed attempt should be retried within its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connection refused, timeout, 5xx, undersized body, disk write error.
    Transient,

    /// Failure that will not succeed regardless of retries.
    ///
    /// Examples: 404, 400, malformed URL or data URI, render timeout.
    Permanent,

    /// Server rate limiting (HTTP 429). Retried, honouring `Retry-After`.
    RateLimited,

    /// HTTP 403. Retried like a transient failure; on the tier's final
    /// attempt the escalation machine decides what happens next.
    Forbidden,
}

impl FailureType {
    /// Returns true when another attempt in the same tier may help.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior within one fetch tier.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `base_delay`: 500 ms
/// - `max_delay`: 10 seconds
/// - `wait_ceiling`: 10 seconds
/// - `max_jitter`: 300 ms
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * attempt, max_delay) + jitter
/// ```
///
/// A `Retry-After` value replaces the computed delay (without jitter). The sum
/// of all waits in a tier never exceeds `wait_ceiling`: computed delays are
/// clamped to what is left, while a server-mandated delay that does not fit
/// ends the tier instead.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay before the first retry; grows linearly per attempt.
    base_delay: Duration,

    /// Cap on a single computed delay.
    max_delay: Duration,

    /// Cap on the total wait across the tier.
    wait_ceiling: Duration,

    /// Upper bound of random jitter added to computed delays.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            wait_ceiling: DEFAULT_WAIT_CEILING,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (clamped to >= 1)
    /// * `base_delay` - Delay before the first retry
    /// * `max_delay` - Cap on a single computed delay
    /// * `wait_ceiling` - Cap on total waiting in the tier
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        wait_ceiling: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            wait_ceiling,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Replaces the jitter upper bound. `Duration::ZERO` makes delays deterministic.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Replaces the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the total wait ceiling for the tier.
    #[must_use]
    pub fn wait_ceiling(&self) -> Duration {
        self.wait_ceiling
    }

    /// Returns true when `attempt` is the last one the tier allows.
    #[must_use]
    pub fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    /// * `waited` - Total time already spent waiting in this tier
    /// * `retry_after` - Server-mandated delay, if the response carried one
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(
        &self,
        failure_type: FailureType,
        attempt: u32,
        waited: Duration,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if !failure_type.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let remaining = self.wait_ceiling.saturating_sub(waited);
        let delay = match retry_after {
            Some(mandated) if mandated > remaining => {
                return RetryDecision::DoNotRetry {
                    reason: format!(
                        "Retry-After of {}ms exceeds remaining wait budget of {}ms",
                        mandated.as_millis(),
                        remaining.as_millis()
                    ),
                };
            }
            Some(mandated) => mandated,
            None if remaining.is_zero() && !self.wait_ceiling.is_zero() => {
                return RetryDecision::DoNotRetry {
                    reason: "wait budget exhausted".to_string(),
                };
            }
            None => self.calculate_delay(attempt).min(remaining),
        };

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry with linear growth, cap and jitter.
    ///
    /// Formula: `min(base_delay * attempt, max_delay) + jitter`
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let linear = self.base_delay.saturating_mul(attempt.max(1));
        linear.min(self.max_delay) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and `max_jitter`.
    fn calculate_jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_possible_truncation)]
        let max_ms = self.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type |
/// |--------|------|
/// | 403 | Forbidden |
/// | 408 | Transient |
/// | 429 | RateLimited |
/// | other 4xx | Permanent |
/// | 5xx | Transient |
///
/// # Non-HTTP Errors
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, Network | Transient |
/// | Io (write failure) | Transient |
/// | Undersized | Transient |
/// | Browser | Transient |
/// | InvalidUrl, InvalidData, RenderTimeout | Permanent |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),

        DownloadError::Timeout { .. }
        | DownloadError::Network { .. }
        | DownloadError::Io { .. }
        | DownloadError::Undersized { .. }
        | DownloadError::Browser { .. } => FailureType::Transient,

        DownloadError::InvalidUrl { .. }
        | DownloadError::InvalidData { .. }
        | DownloadError::RenderTimeout { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        403 => FailureType::Forbidden,
        408 => FailureType::Transient,   // Request Timeout
        429 => FailureType::RateLimited, // Too Many Requests

        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,

        // Anything else is unexpected, treat as permanent
        _ => FailureType::Permanent,
    }
}
