//! Reconnect policy for the client connection.
//!
//! [`ReconnectPolicy`] holds the static settings (attempt budget, delay,
//! cool-down, what to do on exhaustion) and [`ReconnectState`] tracks the
//! attempt counter and cool-down deadline. Both take explicit `Instant`s and
//! sleep through a [`Sleeper`], so they can be driven without real timers.

use std::time::{Duration, Instant};

/// What happens once every reconnect attempt has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExhausted {
    /// Hand control back; `send` answers `SERVER_ERROR` until the cool-down passes.
    ReturnError,
    /// Terminate the process.
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Pause before each attempt.
    pub delay: Duration,
    /// How long after exhaustion before the budget is restored.
    pub cooldown: Duration,
    pub on_exhausted: OnExhausted,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(5),
            on_exhausted: OnExhausted::ReturnError,
        }
    }
}

/// Blocking pause used between reconnect attempts.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Attempt counter and cool-down deadline.
#[derive(Debug, Default, Clone)]
pub struct ReconnectState {
    attempt: u32,
    next_allowed_at: Option<Instant>,
}

impl ReconnectState {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_allowed_at(&self) -> Option<Instant> {
        self.next_allowed_at
    }

    /// Connection established: restore the full budget.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_allowed_at = None;
    }

    /// Whether a reconnect may start at `now`.
    ///
    /// Once the cool-down after exhaustion has elapsed the budget is revived.
    pub fn permits(&mut self, policy: &ReconnectPolicy, now: Instant) -> bool {
        if let Some(at) = self.next_allowed_at {
            if now < at {
                return false;
            }
            self.reset();
        }
        self.attempt < policy.max_attempts
    }

    /// Consume one attempt, returning its 1-based number, or `None` when spent.
    pub fn next_attempt(&mut self, policy: &ReconnectPolicy) -> Option<u32> {
        if self.attempt >= policy.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    /// Mark the budget spent and start the cool-down.
    pub fn exhaust(&mut self, policy: &ReconnectPolicy, now: Instant) {
        self.attempt = policy.max_attempts;
        self.next_allowed_at = Some(now + policy.cooldown);
    }
}
