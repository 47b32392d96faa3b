//! Retry policy with exponential backoff for uploads.
//!
//! Delays double on each retry with no jitter and no upper bound; the total
//! number of attempts is `max_retries + 1`.

use std::time::Duration;

use crate::error::StorageError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Configuration for upload retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry (doubles each attempt).
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Build a policy from a delay in (fractional) seconds.
    ///
    /// Returns `None` for delays that are negative, non-finite, too large for
    /// a `Duration`, or that round down to zero.
    pub fn from_secs_f64(max_retries: u32, initial_delay_secs: f64) -> Option<Self> {
        let initial_delay = Duration::try_from_secs_f64(initial_delay_secs)
            .ok()
            .filter(|d| !d.is_zero())?;
        Some(Self::new(max_retries, initial_delay))
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before `attempt` (0-based).
    ///
    /// Attempt 0 runs immediately; attempt `k >= 1` waits
    /// `initial_delay * 2^(k-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Attempt bookkeeping for a single upload call.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Number of attempts already made.
    pub attempt: u32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<StorageError>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the policy allows another attempt.
    pub fn can_attempt(&self, policy: &RetryPolicy) -> bool {
        self.attempt <= policy.max_retries
    }

    /// Record a failed attempt and move on to the next one.
    pub fn record_failure(&mut self, error: StorageError) {
        self.last_error = Some(error);
        self.attempt = self.attempt.saturating_add(1);
    }

    /// Consume the state, yielding the most recent error.
    pub fn into_error(self) -> StorageError {
        self.last_error
            .unwrap_or_else(|| StorageError::upload_failed("no upload attempt was made"))
    }
}
