//! Global pacing of outbound fetch attempts.
//!
//! A single gate shared by every in-flight resolution. Waiters queue on a
//! fair mutex, so clearances are granted in arrival order and each one is
//! spaced from the previous grant.

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Jitter applied to the interval when humanization is on (±25%).
pub const JITTER_FRACTION: f64 = 0.25;

pub struct RateLimiter {
    interval: Duration,
    humanize: bool,
    /// When the previous clearance was granted.
    last_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration, humanize: bool) -> Self {
        Self {
            interval,
            humanize,
            last_grant: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Wait until the next attempt is allowed. Returns the time spent waiting.
    ///
    /// The first clearance is immediate. The lock is held across the sleep,
    /// which keeps later callers queued behind this one.
    pub async fn acquire(&self) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }

        let mut last_grant = self.last_grant.lock().await;
        let started = Instant::now();

        if let Some(previous) = *last_grant {
            let gap = self.next_gap();
            let ready_at = previous + gap;
            if ready_at > started {
                tracing::debug!(
                    "rate limit: waiting {:.2}s before next request",
                    (ready_at - started).as_secs_f64()
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let granted = Instant::now();
        *last_grant = Some(granted);
        granted - started
    }

    /// Interval for the next grant, jittered when humanized.
    fn next_gap(&self) -> Duration {
        if !self.humanize {
            return self.interval;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        self.interval.mul_f64(factor)
    }
}
