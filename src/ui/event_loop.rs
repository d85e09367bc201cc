use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::countdown::DisplayCountdownTimer;
use super::scheduler::Scheduler;
use super::{SharedDisplay, StatusView};
use crate::clock::Clock;

/// Longest the loop sleeps when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownOutcome {
    Completed,
    Cancelled,
}

pub enum UiCommand {
    Show {
        view: StatusView,
        image: Option<PathBuf>,
    },
    StartCountdown {
        seconds: u32,
        done: Sender<CountdownOutcome>,
    },
    CancelCountdown,
    ShowIdle,
    Shutdown,
}

/// Display operations the trigger loop needs.
pub trait UiPort: Send {
    fn show(&self, view: StatusView, image: Option<PathBuf>);

    /// Start a countdown. The receiver yields `Completed` when it reaches zero and
    /// disconnects if it is cancelled. `None` when the display loop is gone.
    fn start_countdown(&self, seconds: u32) -> Option<Receiver<CountdownOutcome>>;

    fn cancel_countdown(&self);

    fn show_idle(&self);
}

/// Sending side of a [`UiLoop`].
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<UiCommand>,
}

impl UiHandle {
    fn send(&self, command: UiCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn shutdown(&self) {
        self.send(UiCommand::Shutdown);
    }
}

impl UiPort for UiHandle {
    fn show(&self, view: StatusView, image: Option<PathBuf>) {
        if !self.send(UiCommand::Show { view, image }) {
            log::debug!("ui: display loop gone, status update dropped");
        }
    }

    fn start_countdown(&self, seconds: u32) -> Option<Receiver<CountdownOutcome>> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(UiCommand::StartCountdown {
            seconds,
            done: done_tx,
        })
        .then_some(done_rx)
    }

    fn cancel_countdown(&self) {
        self.send(UiCommand::CancelCountdown);
    }

    fn show_idle(&self) {
        self.send(UiCommand::ShowIdle);
    }
}

/// Cooperative display loop. Single-threaded: commands, timer callbacks and rendering
/// all run on the thread that calls [`UiLoop::pump`].
pub struct UiLoop {
    rx: Receiver<UiCommand>,
    scheduler: Scheduler,
    display: SharedDisplay,
    countdown: Option<DisplayCountdownTimer>,
    closed: bool,
}

impl UiLoop {
    pub fn new(display: SharedDisplay, clock: Arc<dyn Clock>) -> (Self, UiHandle) {
        let (tx, rx) = mpsc::channel();
        let ui = Self {
            rx,
            scheduler: Scheduler::new(clock),
            display,
            countdown: None,
            closed: false,
        };
        (ui, UiHandle { tx })
    }

    /// Wait up to `max_wait` for a command, then run due timers.
    ///
    /// Returns false once the loop has shut down.
    pub fn pump(&mut self, max_wait: Duration) -> bool {
        if self.closed {
            return false;
        }
        let wait = self
            .scheduler
            .time_until_next()
            .map_or(max_wait, |until| until.min(max_wait));
        match self.rx.recv_timeout(wait) {
            Ok(command) => self.handle(command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.close(),
        }
        // Drain anything else already queued before running timers.
        while !self.closed {
            match self.rx.try_recv() {
                Ok(command) => self.handle(command),
                Err(_) => break,
            }
        }
        if !self.closed {
            self.scheduler.run_due();
        }
        !self.closed
    }

    pub fn run(mut self) {
        log::debug!("ui: display loop started");
        while self.pump(IDLE_WAIT) {}
        log::debug!("ui: display loop stopped");
    }

    /// Spawn [`UiLoop::run`] on a named thread.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("ui".to_string())
            .spawn(move || self.run())
    }

    fn handle(&mut self, command: UiCommand) {
        match command {
            UiCommand::Show { view, image } => {
                lock(&self.display).show_status(&view, image.as_deref());
            }
            UiCommand::StartCountdown { seconds, done } => {
                self.cancel_countdown();
                let display = Arc::clone(&self.display);
                let timer = DisplayCountdownTimer::start(
                    &mut self.scheduler,
                    seconds,
                    move |left| lock(&display).show_countdown(left),
                    move || {
                        let _ = done.send(CountdownOutcome::Completed);
                    },
                );
                self.countdown = Some(timer);
            }
            UiCommand::CancelCountdown => self.cancel_countdown(),
            UiCommand::ShowIdle => lock(&self.display).show_idle(),
            UiCommand::Shutdown => self.close(),
        }
    }

    fn cancel_countdown(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            if countdown.cancel() {
                log::debug!("ui: countdown cancelled with {}s left", countdown.remaining());
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.cancel_countdown();
        self.scheduler.clear();
        lock(&self.display).close();
        self.closed = true;
    }
}

fn lock(display: &SharedDisplay) -> std::sync::MutexGuard<'_, dyn super::DisplaySink + 'static> {
    display.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
