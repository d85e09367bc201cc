use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::scheduler::{Scheduler, TimerHandle};

const TICK: Duration = Duration::from_secs(1);

type TickFn = Box<dyn FnMut(u32) + Send>;
type DoneFn = Box<dyn FnOnce() + Send>;

struct CountdownState {
    remaining: u32,
    timer: Option<TimerHandle>,
    on_tick: TickFn,
    on_done: Option<DoneFn>,
    cancelled: bool,
}

/// Seconds countdown driven by a [`Scheduler`].
///
/// `on_tick` sees the seconds left (N, N-1, ..., 1). `on_done` runs exactly once when the
/// count reaches zero, and never if the countdown is cancelled first.
#[derive(Clone)]
pub struct DisplayCountdownTimer {
    state: Arc<Mutex<CountdownState>>,
}

impl DisplayCountdownTimer {
    pub fn start<T, D>(scheduler: &mut Scheduler, seconds: u32, on_tick: T, on_done: D) -> Self
    where
        T: FnMut(u32) + Send + 'static,
        D: FnOnce() + Send + 'static,
    {
        let timer = Self {
            state: Arc::new(Mutex::new(CountdownState {
                remaining: seconds,
                timer: None,
                on_tick: Box::new(on_tick),
                on_done: Some(Box::new(on_done)),
                cancelled: false,
            })),
        };
        if seconds == 0 {
            timer.finish();
        } else {
            let mut state = timer.lock();
            (state.on_tick)(seconds);
            state.timer = Some(Self::arm(scheduler, Arc::clone(&timer.state)));
        }
        timer
    }

    fn lock(&self) -> MutexGuard<'_, CountdownState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn arm(scheduler: &mut Scheduler, state: Arc<Mutex<CountdownState>>) -> TimerHandle {
        scheduler.schedule_after(TICK, move |scheduler| {
            let timer = DisplayCountdownTimer { state };
            timer.tick(scheduler);
        })
    }

    fn tick(&self, scheduler: &mut Scheduler) {
        let mut state = self.lock();
        if state.cancelled || state.on_done.is_none() {
            return;
        }
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            state.timer = None;
            drop(state);
            self.finish();
            return;
        }
        let remaining = state.remaining;
        (state.on_tick)(remaining);
        state.timer = Some(Self::arm(scheduler, Arc::clone(&self.state)));
    }

    fn finish(&self) {
        let done = self.lock().on_done.take();
        if let Some(done) = done {
            done();
        }
    }

    /// Stop the countdown without running `on_done`. Returns false if it had already
    /// finished or been cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if state.cancelled || state.on_done.is_none() {
            return false;
        }
        state.cancelled = true;
        state.on_done = None;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        true
    }

    pub fn remaining(&self) -> u32 {
        self.lock().remaining
    }

    /// Still counting.
    pub fn is_active(&self) -> bool {
        let state = self.lock();
        !state.cancelled && state.on_done.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        scheduler: Scheduler,
        clock: ManualClock,
        ticks: Arc<Mutex<Vec<u32>>>,
        done: Arc<AtomicU32>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = ManualClock::new();
            Self {
                scheduler: Scheduler::new(Arc::new(clock.clone())),
                clock,
                ticks: Arc::default(),
                done: Arc::default(),
            }
        }

        fn start(&mut self, seconds: u32) -> DisplayCountdownTimer {
            let ticks = Arc::clone(&self.ticks);
            let done = Arc::clone(&self.done);
            DisplayCountdownTimer::start(
                &mut self.scheduler,
                seconds,
                move |left| ticks.lock().unwrap().push(left),
                move || {
                    done.fetch_add(1, Ordering::SeqCst);
                },
            )
        }

        fn advance_secs(&mut self, secs: u64) {
            for _ in 0..secs {
                self.clock.advance(TICK);
                self.scheduler.run_due();
            }
        }
    }

    #[test]
    fn counts_down_once_per_second_then_fires_once() {
        let mut h = Harness::new();
        let countdown = h.start(5);
        assert_eq!(*h.ticks.lock().unwrap(), vec![5]);

        h.advance_secs(4);
        assert_eq!(*h.ticks.lock().unwrap(), vec![5, 4, 3, 2, 1]);
        assert_eq!(h.done.load(Ordering::SeqCst), 0);
        assert!(countdown.is_active());

        h.advance_secs(1);
        assert_eq!(h.done.load(Ordering::SeqCst), 1);
        assert!(!countdown.is_active());
        assert_eq!(countdown.remaining(), 0);

        h.advance_secs(3);
        assert_eq!(h.done.load(Ordering::SeqCst), 1);
        assert!(h.scheduler.is_idle());
    }

    #[test]
    fn does_not_tick_early() {
        let mut h = Harness::new();
        h.start(2);
        h.clock.advance(Duration::from_millis(999));
        assert_eq!(h.scheduler.run_due(), 0);
        assert_eq!(*h.ticks.lock().unwrap(), vec![2]);
    }

    #[test]
    fn cancel_suppresses_completion() {
        let mut h = Harness::new();
        let countdown = h.start(5);
        h.advance_secs(2);
        assert!(countdown.cancel());
        assert!(!countdown.cancel());
        h.advance_secs(10);
        assert_eq!(h.done.load(Ordering::SeqCst), 0);
        assert_eq!(*h.ticks.lock().unwrap(), vec![5, 4, 3]);
        assert!(h.scheduler.is_idle());
    }

    #[test]
    fn zero_seconds_completes_immediately() {
        let mut h = Harness::new();
        let countdown = h.start(0);
        assert_eq!(h.done.load(Ordering::SeqCst), 1);
        assert!(!countdown.cancel());
    }
}
