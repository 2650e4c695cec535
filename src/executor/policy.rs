use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;

/// Status codes retried by [`RetryPolicy::default`].
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Lower and upper bound of the multiplicative jitter applied to every backoff.
pub const JITTER_RANGE: (f64, f64) = (0.9, 1.1);

/// Retry and backoff settings, fixed for the lifetime of an executor.
///
/// Builder methods consume and return the policy, so a shared policy is never mutated
/// in place.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use relaycore::executor::RetryPolicy;
///
/// let policy = RetryPolicy::default()
///     .with_max_retries(5)
///     .with_initial_backoff(Duration::from_millis(200));
/// assert_eq!(policy.max_retries(), 5);
/// assert!(policy.is_retryable(503));
/// assert!(!policy.is_retryable(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            retryable_status_codes: RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }
}

/// Process-independent default policy: 3 retries, 1s initial, 30s cap, doubling.
pub fn default_retry_policy() -> RetryPolicy {
    RetryPolicy::default()
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Sets the growth factor; values below 1.0 are raised to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn retryable_status_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_status_codes
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Un-jittered delay before retry `attempt`: `min(initial * multiplier^attempt, max)`.
    pub fn nominal_backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_backoff.as_secs_f64();
        if raw.is_finite() && raw < cap {
            Duration::from_secs_f64(raw)
        } else {
            self.max_backoff
        }
    }

    /// Delay before retry `attempt` with a fresh uniform jitter factor.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(JITTER_RANGE.0..=JITTER_RANGE.1);
        self.backoff_with_jitter(attempt, factor)
    }

    /// Delay before retry `attempt` for a caller-chosen jitter factor.
    ///
    /// The factor is clamped into [`JITTER_RANGE`], so the result always stays within
    /// ten percent of [`RetryPolicy::nominal_backoff`].
    pub fn backoff_with_jitter(&self, attempt: u32, factor: f64) -> Duration {
        let factor = if factor.is_nan() {
            1.0
        } else {
            factor.clamp(JITTER_RANGE.0, JITTER_RANGE.1)
        };
        let nominal = self.nominal_backoff(attempt);
        Duration::try_from_secs_f64(nominal.as_secs_f64() * factor).unwrap_or(nominal)
    }
}
