//! Outbound call pacing shared by all dispatch tasks.
//!
//! The limiter bounds the aggregate call rate only. Concurrent waiters are
//! not ordered relative to each other.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimit;

/// Minimum-interval gate. Share it with `Arc` across workers.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        let interval = match limit {
            RateLimit::Unlimited => None,
            RateLimit::PerSecond(r) => Some(Duration::from_secs_f64(1.0 / r)),
        };
        Self {
            interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(RateLimit::Unlimited)
    }

    /// Minimum spacing between permitted calls, `None` when unlimited.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Suspend until at least one interval has passed since the previous
    /// permitted call returned from `wait`.
    pub async fn wait(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
