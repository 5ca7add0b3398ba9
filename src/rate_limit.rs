//! Per-device wake-call debounce.
//!
//! Maps device id to the instant of its last *successful* wake call.
//! Entries are created on first success and overwritten on each later one;
//! nothing is ever evicted, so the table grows with the number of distinct
//! devices seen over the process lifetime.
//!
//! Callers pass `now` explicitly so tests can drive the clock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub struct RateLimiter {
    window: Duration,
    last_ping: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        RateLimiter {
            window,
            last_ping: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a wake call for `device_id` is admitted at `now`.
    ///
    /// A device with no recorded success is always eligible.
    pub fn should_ping(&self, device_id: &str, now: Instant) -> bool {
        match self.table().get(device_id) {
            Some(&last) => now.duration_since(last) >= self.window,
            None => true,
        }
    }

    /// Record a confirmed successful wake call, overwriting any prior entry.
    ///
    /// Only the notifier calls this, and only after a 2xx response.
    pub fn record_success(&self, device_id: &str, now: Instant) {
        self.table().insert(device_id.to_owned(), now);
    }

    /// Time left in the debounce window, floored at zero.
    pub fn remaining(&self, device_id: &str, now: Instant) -> Duration {
        match self.table().get(device_id) {
            Some(&last) => self.window.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.last_ping.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
