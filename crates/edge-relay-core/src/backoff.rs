//! Escalating backoff for consecutive forwarding failures.
//!
//! The backoff period is the square of the number of sequential errors,
//! capped at a configurable ceiling:
//!
//! - 2 errors = 2 ^ 2 = 4 second backoff
//! - 3 errors = 3 ^ 2 = 9 second backoff
//! - 4 errors = 4 ^ 2 = 16 second backoff
//!
//! Each forwarder task owns its own counter; it is never shared.

use std::time::Duration;

/// Tracks consecutive failures for one forwarder task and computes the
/// delay to apply after each one.
#[derive(Debug)]
pub struct Backoff {
    failures: u32,
    max: Duration,
}

impl Backoff {
    /// Create a controller with the given ceiling in seconds.
    #[must_use]
    pub fn new(max_backoff_secs: u64) -> Self {
        Self {
            failures: 0,
            max: Duration::from_secs(max_backoff_secs),
        }
    }

    /// Number of consecutive failures recorded so far.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return the delay to sleep for.
    pub fn penalize(&mut self) -> Duration {
        self.failures += 1;
        delay_for(self.failures, self.max)
    }

    /// Reset the counter after a fully successful cycle.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Compute `min(n², max)` as a duration.
fn delay_for(failures: u32, max: Duration) -> Duration {
    let squared = Duration::from_secs(u64::from(failures) * u64::from(failures));
    squared.min(max)
}
