//! Shutdown coordination.
//!
//! - `ShutdownSignal`: process-wide stop flag with an interruptible wait. Every blocking
//!   wait in the controller (settle delay, actuator pulse, countdown wait) goes through it so
//!   a stop request cuts the wait short.
//! - `SessionShutdown`: ordered teardown steps that run exactly once, no matter how many
//!   callers (Ctrl-C handler, quit command, end of `main`) race to trigger it.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter.
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleep for `timeout` unless shutdown is requested first.
    ///
    /// Returns `true` when the wait was cut short by shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match cvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

type ShutdownStep = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

#[derive(Default)]
struct Steps {
    ordered: Vec<(&'static str, ShutdownStep)>,
    last: Vec<(&'static str, ShutdownStep)>,
}

/// Ordered, run-once teardown.
pub struct SessionShutdown {
    signal: ShutdownSignal,
    steps: Mutex<Option<Steps>>,
}

impl SessionShutdown {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self {
            signal,
            steps: Mutex::new(Some(Steps::default())),
        }
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    /// Append a teardown step. Steps registered after shutdown has run are dropped.
    pub fn register<F>(&self, name: &'static str, step: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push(name, Box::new(step), false);
    }

    /// Append a step that runs after every [`SessionShutdown::register`] step, whenever it
    /// was registered. Used for releasing hardware that workers may still touch.
    pub fn register_final<F>(&self, name: &'static str, step: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push(name, Box::new(step), true);
    }

    fn push(&self, name: &'static str, step: ShutdownStep, last: bool) {
        let mut steps = self.steps.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match steps.as_mut() {
            Some(steps) if last => steps.last.push((name, step)),
            Some(steps) => steps.ordered.push((name, step)),
            None => log::warn!("shutdown step '{}' registered after shutdown; ignored", name),
        }
    }

    /// Trigger the stop signal and run all steps in registration order.
    ///
    /// Returns `true` for the caller that actually performed the teardown. Concurrent
    /// callers block until it has finished and then return `false`.
    pub fn run(&self) -> bool {
        self.signal.trigger();
        let mut guard = self.steps.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(steps) = guard.take() else {
            return false;
        };
        let Steps { ordered, last } = steps;
        log::info!("session shutdown: {} step(s)", ordered.len() + last.len());
        for (name, step) in ordered.into_iter().chain(last) {
            match step() {
                Ok(()) => log::debug!("shutdown step '{}' done", name),
                Err(err) => log::error!("shutdown step '{}' failed: {:#}", name, err),
            }
        }
        true
    }

    pub fn has_run(&self) -> bool {
        self.steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn wait_timeout_returns_false_when_not_interrupted() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn trigger_interrupts_a_long_wait() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let interrupted = waiter.wait_timeout(Duration::from_secs(30));
            (interrupted, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        signal.trigger();
        let (interrupted, elapsed) = handle.join().unwrap();
        assert!(interrupted);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn steps_run_once_in_order_across_racing_callers() {
        let shutdown = Arc::new(SessionShutdown::new(ShutdownSignal::new()));
        let order = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        for name in ["stop camera", "outputs low", "release gpio"] {
            let order = order.clone();
            let calls = calls.clone();
            shutdown.register(name, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                order.lock().unwrap().push(name);
                Ok(())
            });
        }

        let racers: Vec<_> = (0..4)
            .map(|_| {
                let shutdown = shutdown.clone();
                std::thread::spawn(move || shutdown.run())
            })
            .collect();
        let winners = racers
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ran| *ran)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["stop camera", "outputs low", "release gpio"]
        );
        assert!(shutdown.has_run());
        assert!(shutdown.signal().is_triggered());
    }

    #[test]
    fn final_steps_run_after_ordinary_steps() {
        let shutdown = SessionShutdown::new(ShutdownSignal::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, last) in [("gpio", true), ("trigger loop", false), ("camera", false)] {
            let order = order.clone();
            let step = move || {
                order.lock().unwrap().push(name);
                Ok(())
            };
            if last {
                shutdown.register_final(name, step);
            } else {
                shutdown.register(name, step);
            }
        }
        assert!(shutdown.run());
        assert_eq!(*order.lock().unwrap(), vec!["trigger loop", "camera", "gpio"]);
        assert!(!shutdown.run());
    }

    #[test]
    fn failing_step_does_not_stop_later_steps() {
        let shutdown = SessionShutdown::new(ShutdownSignal::new());
        let reached = Arc::new(AtomicUsize::new(0));
        shutdown.register("broken", || Err(anyhow::anyhow!("device gone")));
        let r = reached.clone();
        shutdown.register("after", move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(shutdown.run());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
