//! Backoff policy: decides retry delays.

use std::time::Duration;

use rand::Rng;

use crate::config::UploadConfig;

/// Exponential backoff with additive jitter, capped.
///
/// `delay(attempt) = min(base * 2^attempt + uniform(0, base), max)`
///
/// Jitter is not optional: tasks that failed together would otherwise retry
/// together and recreate the burst that failed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,

    /// Retries after the first attempt (3 means up to 4 attempts in total).
    pub max_retry_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retry_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retry_attempts,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(
            config.base_delay(),
            config.max_delay(),
            config.max_retry_attempts,
        )
    }

    /// Delay before retrying the attempt with 0-based index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = duration_ms(self.base_delay);
        let jitter_ms = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..base_ms)
        };
        self.delay_with_jitter(attempt, Duration::from_millis(jitter_ms))
    }

    /// Deterministic core of [`delay`](Self::delay).
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let base_ms = duration_ms(self.base_delay);
        let exponential_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        let total_ms = exponential_ms.saturating_add(duration_ms(jitter));
        Duration::from_millis(total_ms).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made <= self.max_retry_attempts
    }

    /// Upper bound on upload calls for one task.
    pub fn max_attempts(&self) -> u32 {
        self.max_retry_attempts.saturating_add(1)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 3)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
