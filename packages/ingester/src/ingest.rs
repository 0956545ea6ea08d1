//! Supervised, resubscribing ingestion of chain activity into storage

pub mod headers;
pub mod submissions;
mod table;

use std::time::Duration;

pub use headers::HeaderIngestion;
pub use submissions::SubmissionIngestion;

/// Delay between resubscribe attempts
///
/// Doubles on every consecutive failure up to `max`, goes back to `initial`
/// once an event was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

/// Shortest delay a policy will ever hand out
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

impl RetryPolicy {
    /// `initial` is raised to [`MIN_RETRY_DELAY`], `max` to `initial`
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_RETRY_DELAY);
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            next: self.initial,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    next: Duration,
}

impl Backoff {
    /// The delay to wait now, and grows the one after it
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.policy.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.policy.initial;
    }
}
