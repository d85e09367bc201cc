//! Operator display.
//!
//! The trigger loop never renders anything itself. It sends commands to a [`UiLoop`]
//! running on its own thread, which owns the [`DisplaySink`], the cooperative
//! [`Scheduler`] and the active [`DisplayCountdownTimer`].

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod countdown;
mod event_loop;
mod scheduler;

pub use countdown::DisplayCountdownTimer;
pub use event_loop::{CountdownOutcome, UiCommand, UiHandle, UiLoop, UiPort};
pub use scheduler::{Scheduler, TimerCallback, TimerHandle};

use crate::resolve::SortCategory;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Colour {
    Red,
    Blue,
    Yellow,
    Green,
    LightGrey,
    White,
    Black,
}

impl Colour {
    /// Style name understood by indicatif templates.
    fn term_style(self) -> &'static str {
        match self {
            Colour::Red => "red",
            Colour::Blue => "blue",
            Colour::Yellow => "yellow",
            Colour::Green => "green",
            Colour::LightGrey | Colour::White => "white",
            Colour::Black => "black",
        }
    }
}

/// What the screen shows for one state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusView {
    pub title: String,
    pub detail: String,
    pub background: Colour,
    pub foreground: Colour,
}

impl StatusView {
    fn new(title: &str, detail: &str, background: Colour, foreground: Colour) -> Self {
        Self {
            title: title.to_string(),
            detail: detail.to_string(),
            background,
            foreground,
        }
    }

    pub fn idle() -> Self {
        Self::new(
            "Input Waste",
            "Place the item in the slot",
            Colour::LightGrey,
            Colour::Black,
        )
    }

    pub fn for_category(category: SortCategory) -> Self {
        match category {
            SortCategory::NoCap => {
                Self::new("Remove the cap first", "Bottle Cap", Colour::Red, Colour::White)
            }
            SortCategory::Blue => {
                Self::new("Sort by colour", "Plastic Waste", Colour::Blue, Colour::White)
            }
            SortCategory::Yellow => {
                Self::new("Sort by colour", "General Waste", Colour::Yellow, Colour::Black)
            }
            SortCategory::Green => {
                Self::new("Sort by colour", "Glass/Metal Waste", Colour::Green, Colour::White)
            }
            SortCategory::Error => {
                Self::new("ERROR", "Unrecognised object", Colour::Red, Colour::White)
            }
        }
    }
}

pub fn countdown_text(seconds_left: u32) -> String {
    format!("Returning to main screen in {} s", seconds_left)
}

/// Rendering backend.
pub trait DisplaySink: Send {
    fn show_status(&mut self, view: &StatusView, image: Option<&Path>);

    fn show_countdown(&mut self, seconds_left: u32);

    fn show_idle(&mut self);

    fn close(&mut self) {}
}

pub type SharedDisplay = Arc<Mutex<dyn DisplaySink>>;

// ----------------------------------------------------------------------------
// Terminal display
// ----------------------------------------------------------------------------

/// Status line on stderr: an indicatif spinner on a terminal, plain lines otherwise.
pub struct TerminalDisplay {
    spinner: Option<ProgressBar>,
    current: StatusView,
}

impl TerminalDisplay {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        let use_pretty = is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => !disable_pretty,
                UiMode::Plain => false,
            };
        let spinner = use_pretty.then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner
        });
        Self {
            spinner,
            current: StatusView::idle(),
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn render(&self, suffix: Option<String>) {
        let view = &self.current;
        let mut line = format!("{}: {}", view.title, view.detail);
        if let Some(suffix) = suffix {
            line.push_str(" | ");
            line.push_str(&suffix);
        }
        match &self.spinner {
            Some(spinner) => {
                let template = format!("{{spinner}} {{msg:.{}}}", view.background.term_style());
                let style = ProgressStyle::with_template(&template)
                    .unwrap_or_else(|_| ProgressStyle::default_spinner());
                spinner.set_style(style);
                spinner.set_message(line);
            }
            None => eprintln!("==> {}", line),
        }
    }
}

impl DisplaySink for TerminalDisplay {
    fn show_status(&mut self, view: &StatusView, image: Option<&Path>) {
        self.current = view.clone();
        let suffix = image.map(|path| format!("snapshot {}", path.display()));
        self.render(suffix);
    }

    fn show_countdown(&mut self, seconds_left: u32) {
        self.render(Some(countdown_text(seconds_left)));
    }

    fn show_idle(&mut self) {
        self.current = StatusView::idle();
        self.render(None);
    }

    fn close(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_with_message("✔ sorter stopped");
        } else {
            eprintln!("✔ sorter stopped");
        }
    }
}

// ----------------------------------------------------------------------------
// Recording display for tests and headless runs
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    Status {
        view: StatusView,
        image: Option<PathBuf>,
    },
    Countdown(u32),
    Idle,
    Closed,
}

#[derive(Clone, Default)]
pub struct RecordingDisplay {
    events: Arc<Mutex<Vec<DisplayEvent>>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, event: DisplayEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

impl DisplaySink for RecordingDisplay {
    fn show_status(&mut self, view: &StatusView, image: Option<&Path>) {
        self.record(DisplayEvent::Status {
            view: view.clone(),
            image: image.map(Path::to_path_buf),
        });
    }

    fn show_countdown(&mut self, seconds_left: u32) {
        self.record(DisplayEvent::Countdown(seconds_left));
    }

    fn show_idle(&mut self) {
        self.record(DisplayEvent::Idle);
    }

    fn close(&mut self) {
        self.record(DisplayEvent::Closed);
    }
}
