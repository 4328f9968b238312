//! Time source used by the readiness prober.

use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time and blocking sleep.
pub trait Clock {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Clock backed by [`Instant::now`] and [`thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
