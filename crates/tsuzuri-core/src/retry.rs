//! Retry policy for calls to the generation backend.

use crate::error::BackendError;
use std::collections::BTreeSet;
use std::time::Duration;

/// Error returned when [`RetryPolicy`] configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicyError(pub &'static str);

impl std::fmt::Display for RetryPolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryPolicyError {}

/// Bounded exponential-backoff retry configuration.
///
/// The delay before retry `n` (0-indexed) is `initial_delay * exp_base^n`,
/// capped by `max_delay` when one is set. Only failures whose status code is
/// in `retry_on`, or transport failures when `retry_transport` is set, are
/// retried.
///
/// # Examples
///
/// ```
/// use tsuzuri_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(3, Duration::from_secs(1), 7, [429, 503])?;
///
/// assert_eq!(policy.max_attempts(), 3);
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(7));
/// # Ok::<(), tsuzuri_core::RetryPolicyError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    exp_base: u32,
    max_delay: Option<Duration>,
    retry_on: BTreeSet<u16>,
    retry_transport: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::gemini_default()
    }
}

impl RetryPolicy {
    /// Creates an exponential backoff policy.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if:
    /// - `max_attempts` is 0
    /// - `exp_base` is 0 or greater than 10
    pub fn exponential(
        max_attempts: u32,
        initial_delay: Duration,
        exp_base: u32,
        retry_on: impl IntoIterator<Item = u16>,
    ) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError("max_attempts must be at least 1"));
        }
        if exp_base == 0 {
            return Err(RetryPolicyError("exp_base must be greater than 0"));
        }
        if exp_base > 10 {
            return Err(RetryPolicyError(
                "exp_base must be 10 or less to avoid overflow",
            ));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            exp_base,
            max_delay: None,
            retry_on: retry_on.into_iter().collect(),
            retry_transport: true,
        })
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            exp_base: 1,
            max_delay: None,
            retry_on: BTreeSet::new(),
            retry_transport: false,
        }
    }

    /// Five attempts, 1s initial delay, base 7, retrying 429/500/503/504.
    pub fn gemini_default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            exp_base: 7,
            max_delay: None,
            retry_on: [429, 500, 503, 504].into_iter().collect(),
            retry_transport: true,
        }
    }

    /// Caps every backoff delay.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if `max_delay` is less than the initial delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Result<Self, RetryPolicyError> {
        if max_delay < self.initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        self.max_delay = Some(max_delay);
        Ok(self)
    }

    /// Sets whether transport failures (no HTTP status) are retried.
    pub fn with_transport_retries(mut self, enabled: bool) -> Self {
        self.retry_transport = enabled;
        self
    }

    /// Returns the maximum number of attempts, including the first call.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the status codes eligible for retry.
    pub fn retry_on(&self) -> &BTreeSet<u16> {
        &self.retry_on
    }

    /// Returns `true` if the failure class is eligible for retry.
    ///
    /// Attempt counting is left to the caller.
    pub fn is_retryable(&self, error: &BackendError) -> bool {
        match error {
            BackendError::Status { code, .. } => self.retry_on.contains(code),
            BackendError::Transport(_) => self.retry_transport,
            BackendError::InvalidResponse(_) => false,
        }
    }

    /// Returns `true` if another attempt may follow a failure of `attempt`
    /// (0-indexed).
    pub fn should_retry(&self, attempt: u32, error: &BackendError) -> bool {
        attempt + 1 < self.max_attempts && self.is_retryable(error)
    }

    /// Calculates the wait after the failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.exp_base.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
