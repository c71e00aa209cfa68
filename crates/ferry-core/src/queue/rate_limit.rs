//! System-wide request spacing.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Single shared gate: permitted attempts start at least `min_interval` apart,
/// regardless of how many workers are active.
///
/// Each caller reserves the next free slot under the lock and then sleeps
/// outside it, so concurrent callers queue up one interval apart.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_start: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: Arc::new(Mutex::new(None)),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Suspend until the caller may start its request.
    ///
    /// Returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        let now = Instant::now();
        let start = {
            let mut last = self
                .last_start
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let start = match *last {
                Some(prev) => (prev + self.min_interval).max(now),
                None => now,
            };
            *last = Some(start);
            start
        };

        if start > now {
            tracing::trace!(wait_ms = (start - now).as_millis() as u64, "rate limit gate");
            sleep_until(start).await;
        }
        start - now
    }
}
