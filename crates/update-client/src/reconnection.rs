//! Reconnection policy with a linear backoff and a bounded budget.

use std::time::Duration;

use devlink_protocol::constants::{MAX_RECONNECT_ATTEMPTS, RECONNECT_STEP};

/// Decides when the client retries after a lost or failed connection.
///
/// Delays grow linearly from zero: `0s, 5s, 10s, ...`. Once the budget
/// is spent the policy refuses further attempts until [`resume`] is
/// called.
///
/// [`resume`]: ReconnectPolicy::resume
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempt_count: u32,
    max_attempts: u32,
    step: Duration,
    suspended: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(RECONNECT_STEP, MAX_RECONNECT_ATTEMPTS)
    }
}

impl ReconnectPolicy {
    pub fn new(step: Duration, max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            step,
            suspended: false,
        }
    }

    /// Delay before the next reconnect, or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt_count + 1 > self.max_attempts {
            self.suspended = true;
            return None;
        }

        let delay = self.step * self.attempt_count;
        self.attempt_count += 1;
        Some(delay)
    }

    /// Called after a connection opened successfully.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.suspended = false;
    }

    /// Called when the app returns to the foreground. The only way out of
    /// the suspended state.
    pub fn resume(&mut self) {
        self.reset();
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}
