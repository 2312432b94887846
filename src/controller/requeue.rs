//! Requeue policy: error classification and per-key exponential backoff

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Error;

pub const BACKOFF_BASE_SECS: u64 = 30;
pub const BACKOFF_MAX_SECS: u64 = 600;

/// Delay used for known transient platform conflicts
pub const RETRYABLE_CODE_DELAY: Duration = Duration::from_secs(30);

/// `base * 2^attempt`, capped at `max`
pub fn calculate_backoff(attempt: u32, base_delay_secs: u64, max_delay_secs: u64) -> Duration {
    let delay_secs = base_delay_secs.saturating_mul(2_u64.saturating_pow(attempt.min(5)));
    Duration::from_secs(delay_secs.min(max_delay_secs))
}

/// What to do with an object after a reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged; wait for the next change
    Done,
    Requeue(Duration),
    /// Requeue on the key's exponential schedule
    Backoff,
}

/// Default classification of a reconcile error
pub fn classify(err: &Error) -> ReconcileOutcome {
    if err.is_terminal() {
        ReconcileOutcome::Done
    } else if err.is_remote_not_found() {
        ReconcileOutcome::Requeue(Duration::ZERO)
    } else if err.is_remote_retryable_code() {
        ReconcileOutcome::Requeue(RETRYABLE_CODE_DELAY)
    } else if err.is_retriable() {
        ReconcileOutcome::Backoff
    } else {
        ReconcileOutcome::Done
    }
}

/// Failure counts per object key
#[derive(Default)]
pub struct BackoffTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl BackoffTracker {
    /// Delay for the next retry of `key`, counting this failure
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock();
        let attempt = attempts.entry(key.to_string()).or_insert(0);
        let delay = calculate_backoff(*attempt, BACKOFF_BASE_SECS, BACKOFF_MAX_SECS);
        *attempt = attempt.saturating_add(1);
        delay
    }

    pub fn reset(&self, key: &str) {
        self.attempts.lock().remove(key);
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.lock().get(key).copied().unwrap_or(0)
    }
}
