//! Bounded retry policy for asset loads
//!
//! Pure timing decisions, kept apart from I/O so they can be tested alone.
//!
//! **Backoff Strategy:**
//! - Delay after the n-th failed attempt: `base · 2^n + jitter`, jitter uniform in `[0, jitter_max)`
//! - Capped at `cap`
//! - Per-attempt timeouts shrink (15s → 10s → 5s by default) so repeated failures fail fast

use osv_common::CacheSettings;
use rand::Rng;
use std::time::Duration;

/// Retry timing for one load
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    total_attempts: u32,
    attempt_timeouts: Vec<Duration>,
    base: Duration,
    jitter_max: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            total_attempts: settings.total_attempts(),
            attempt_timeouts: settings
                .attempt_timeouts_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            base: Duration::from_millis(settings.backoff_base_ms),
            jitter_max: Duration::from_millis(settings.backoff_jitter_ms),
            cap: Duration::from_millis(settings.backoff_cap_ms),
        }
    }

    /// First try plus retries
    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    /// Whether another attempt is allowed after `attempts_used` have failed
    pub fn should_retry(&self, attempts_used: u32) -> bool {
        attempts_used < self.total_attempts
    }

    /// Timeout for the zero-based attempt; the last configured timeout repeats
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        self.attempt_timeouts
            .get(attempt as usize)
            .or(self.attempt_timeouts.last())
            .copied()
            .unwrap_or(Duration::from_secs(15))
    }

    /// Delay before the next attempt, given failed attempts so far and a chosen jitter
    pub fn backoff_delay(&self, attempts_used: u32, jitter: Duration) -> Duration {
        let factor = 1u32.checked_shl(attempts_used).unwrap_or(u32::MAX);
        let exponential = self.base.saturating_mul(factor);
        exponential.saturating_add(jitter).min(self.cap)
    }

    /// Delay with a uniformly random jitter
    pub fn sample_backoff(&self, attempts_used: u32) -> Duration {
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.backoff_delay(attempts_used, jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}
