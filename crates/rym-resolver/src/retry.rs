//! Failure classification and the retry/backoff policy.
//!
//! The fetch loop in [`crate::resolver`] feeds every failed attempt through
//! [`RetryPolicy::on_failure`], which either grants another attempt (with
//! its backoff delay) or declares the sequence exhausted. Whether a block
//! also forces an identity rotation is decided by the caller from the
//! returned [`ErrorClass`], before the backoff wait.

use std::time::Duration;

use crate::config::{BlockedRetryBudget, ResolverConfig};
use crate::error::FetchFailure;

/// Upper bound for a single backoff wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Retryable failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network error, timeout, overloaded server, truncated page.
    Transient,
    /// Anti-bot challenge or block; retry under a new identity.
    Blocked,
}

/// Result of classifying a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retry(ErrorClass),
    /// The page does not exist or is refused outright; retrying is pointless.
    Unavailable(u16),
}

/// Map a fetcher failure onto the retry taxonomy.
pub fn classify(failure: &FetchFailure) -> Classification {
    match failure {
        FetchFailure::Network(_) | FetchFailure::Timeout => Classification::Retry(ErrorClass::Transient),
        FetchFailure::Challenge => Classification::Retry(ErrorClass::Blocked),
        FetchFailure::Status(429 | 503 | 522) => Classification::Retry(ErrorClass::Blocked),
        FetchFailure::Status(status) if *status >= 500 => {
            Classification::Retry(ErrorClass::Transient)
        }
        FetchFailure::Status(status) => Classification::Unavailable(*status),
    }
}

/// Per-page retry bookkeeping. Lives only as long as one fetch sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// 1-based number of the attempt in flight.
    pub attempt: u32,
    pub transient_failures: u32,
    pub blocked_failures: u32,
    pub last_error: Option<ErrorClass>,
    pub next_delay: Duration,
}

impl Default for RetryState {
    fn default() -> Self {
        Self {
            attempt: 1,
            transient_failures: 0,
            blocked_failures: 0,
            last_error: None,
            next_delay: Duration::ZERO,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    budget: BlockedRetryBudget,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, budget: BlockedRetryBudget, base_delay: Duration) -> Self {
        Self {
            max_retries,
            budget,
            base_delay,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(
            config.max_retries,
            config.blocked_retry_budget,
            config.retry_delay(),
        )
    }

    /// Record a failed attempt and decide whether another one is allowed.
    ///
    /// The backoff is `base_delay * 2^(n-1)` where `n` is the number of the
    /// attempt that just failed, capped at [`MAX_BACKOFF`].
    pub fn on_failure(&self, state: &mut RetryState, class: ErrorClass) -> RetryDecision {
        state.last_error = Some(class);
        match class {
            ErrorClass::Transient => state.transient_failures += 1,
            ErrorClass::Blocked => state.blocked_failures += 1,
        }

        let exhausted = match self.budget {
            BlockedRetryBudget::Shared => state.attempt >= self.max_retries,
            BlockedRetryBudget::Separate {
                max_blocked_retries,
            } => {
                state.transient_failures >= self.max_retries
                    || state.blocked_failures >= max_blocked_retries
            }
        };
        if exhausted {
            state.next_delay = Duration::ZERO;
            return RetryDecision::GiveUp;
        }

        let factor = 1u32
            .checked_shl(state.attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(MAX_BACKOFF);

        state.attempt += 1;
        state.next_delay = delay;
        RetryDecision::Retry { delay }
    }
}
