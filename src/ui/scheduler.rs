//! Cooperative timers for the UI thread.
//!
//! Callbacks run on whichever thread calls [`Scheduler::run_due`], one at a time, in
//! deadline order. A callback may schedule further timers (that is how the countdown
//! re-arms itself every second).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;

pub type TimerCallback = Box<dyn FnOnce(&mut Scheduler) + Send>;

/// Cancellation handle for one scheduled callback.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The callback will not run. Harmless after it already ran.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct PendingTimer {
    handle: TimerHandle,
    callback: TimerCallback,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    // Keyed by (deadline, id) so equal deadlines fire in scheduling order.
    pending: BTreeMap<(Instant, u64), PendingTimer>,
    next_id: u64,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            pending: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn schedule_after<F>(&mut self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce(&mut Scheduler) + Send + 'static,
    {
        let handle = TimerHandle {
            id: self.next_id,
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        self.next_id += 1;
        let deadline = self.clock.now() + delay;
        self.pending.insert(
            (deadline, handle.id),
            PendingTimer {
                handle: handle.clone(),
                callback: Box::new(callback),
            },
        );
        handle
    }

    /// Move a pending timer to `delay` from now. Returns false if it already ran or was
    /// cancelled.
    pub fn reschedule(&mut self, handle: &TimerHandle, delay: Duration) -> bool {
        if handle.is_cancelled() {
            return false;
        }
        let key = self
            .pending
            .keys()
            .find(|(_, id)| *id == handle.id)
            .copied();
        let Some(key) = key else {
            return false;
        };
        let Some(timer) = self.pending.remove(&key) else {
            return false;
        };
        let deadline = self.clock.now() + delay;
        self.pending.insert((deadline, handle.id), timer);
        true
    }

    /// Earliest deadline among live timers.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.pending.retain(|_, timer| !timer.handle.is_cancelled());
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Time until the next deadline, zero if one is already due.
    pub fn time_until_next(&mut self) -> Option<Duration> {
        let now = self.clock.now();
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Run every callback whose deadline has passed. Returns how many ran.
    pub fn run_due(&mut self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.clock.now();
            let due = match self.pending.keys().next() {
                Some(key) if key.0 <= now => *key,
                _ => break,
            };
            let Some(timer) = self.pending.remove(&due) else {
                break;
            };
            if timer.handle.is_cancelled() {
                continue;
            }
            // Mark as spent so a late cancel() is a no-op and reschedule() refuses it.
            timer.handle.cancel();
            (timer.callback)(self);
            ran += 1;
        }
        ran
    }

    pub fn is_idle(&mut self) -> bool {
        self.next_deadline().is_none()
    }

    /// Cancel everything still pending.
    pub fn clear(&mut self) {
        for timer in self.pending.values() {
            timer.handle.cancel();
        }
        self.pending.clear();
    }
}
