//! sorterd - bottle sorter controller daemon
//!
//! This daemon:
//! 1. Loads `SorterConfig` (file from --config / SORTER_CONFIG, then environment)
//! 2. Opens GPIO, camera, classifier (with warm-up) and audio; any failure aborts startup
//! 3. Runs the acquisition, trigger and display threads until Ctrl-C or `q`
//! 4. Tears down once: workers stopped, camera released, every motor pin LOW
//!
//! Keyboard: `s` + Enter runs a cycle without the sensor, `q` + Enter quits.

use anyhow::Result;
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bottle_sorter::trigger::ManualTrigger;
use bottle_sorter::ui::{SharedDisplay, TerminalDisplay};
use bottle_sorter::{Devices, ShutdownSignal, Sorter, SorterConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.json or .toml). Environment overrides still apply.
    #[arg(long, env = "SORTER_CONFIG")]
    config: Option<PathBuf>,
    /// UI mode for the stderr status line (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    /// Do not read `s`/`q` commands from stdin.
    #[arg(long)]
    no_keyboard: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SorterConfig::load_from(path)?,
        None => SorterConfig::load()?,
    };
    log::info!(
        "sorterd {} starting (camera {}, classifier {}, gpio {:?})",
        env!("CARGO_PKG_VERSION"),
        config.camera.device,
        config.classifier.backend,
        config.gpio.backend
    );

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let display: SharedDisplay = Arc::new(Mutex::new(TerminalDisplay::from_args(
        Some(&args.ui),
        is_tty,
        !stdout_is_tty,
    )));

    // Installed before any device is opened so Ctrl-C during startup still tears down.
    let signal = ShutdownSignal::new();
    {
        let signal = signal.clone();
        ctrlc::set_handler(move || {
            signal.trigger();
        })
        .expect("error setting Ctrl-C handler");
    }

    let devices = Devices::open(&config, display)?;
    if signal.is_triggered() {
        log::info!("shutdown requested during startup");
    }
    let sorter = Sorter::start_with_signal(&config, devices, signal)?;

    if !args.no_keyboard {
        spawn_keyboard(sorter.manual_trigger(), sorter.signal())?;
    }

    log::info!("sorterd waiting for items (Ctrl-C or 'q' to quit)...");
    sorter.wait();
    log::info!("shutdown signal received, stopping sorter...");
    if let Some(stats) = sorter.shutdown() {
        log::info!(
            "sorted {} item(s): no-cap {}, blue {}, yellow {}, green {}, error {}; {} trigger(s) ignored",
            stats.cycles,
            stats.by_category[0],
            stats.by_category[1],
            stats.by_category[2],
            stats.by_category[3],
            stats.by_category[4],
            stats.ignored_triggers
        );
    }
    Ok(())
}

fn spawn_keyboard(manual: ManualTrigger, signal: ShutdownSignal) -> Result<()> {
    std::thread::Builder::new()
        .name("keyboard".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "s" | "S" => {
                        log::info!("manual trigger requested");
                        if !manual.request() {
                            break;
                        }
                    }
                    "q" | "Q" => {
                        signal.trigger();
                        break;
                    }
                    "" => {}
                    other => log::warn!("unknown command '{}' (s = trigger, q = quit)", other),
                }
            }
        })?;
    Ok(())
}
