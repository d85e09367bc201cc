//! Time source shared by the UI scheduler and the trigger loop.
//!
//! Production code runs on `SystemClock`. Tests drive `ManualClock` forward explicitly so
//! countdowns and trigger timings can be exercised without waiting in real time.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::shutdown::ShutdownSignal;

pub trait Clock: Send + Sync {
    /// Monotonic "now".
    fn now(&self) -> Instant;

    /// Block for up to `timeout` or until `signal` fires. Returns true if it fired.
    fn wait(&self, signal: &ShutdownSignal, timeout: Duration) -> bool {
        signal.wait_timeout(timeout)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when `advance` is called.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns at once, with the clock moved forward by the full timeout.
    fn wait(&self, signal: &ShutdownSignal, timeout: Duration) -> bool {
        if signal.is_triggered() {
            return true;
        }
        self.advance(timeout);
        signal.is_triggered()
    }
}
