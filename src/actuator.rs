//! Motor actuation.
//!
//! Three motor channels route an item into a bin. Each channel has an Up pin (route) and a
//! Down pin (return to the receiving position). A pulse drives one pin HIGH for a fixed
//! time and then LOW again.
//!
//! - Only one pulse is in flight across all channels at a time.
//! - The pin is LOW again when `fire` returns, including on write errors, panics and
//!   shutdown interrupting the pulse.

use anyhow::{anyhow, Result};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GpioSettings;
use crate::gpio::{self, Level, PinMode, SharedGpio};
use crate::resolve::SortCategory;
use crate::shutdown::ShutdownSignal;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MotorChannel {
    M1,
    M2,
    M3,
}

impl MotorChannel {
    pub const ALL: [MotorChannel; 3] = [MotorChannel::M1, MotorChannel::M2, MotorChannel::M3];

    /// Channel that routes `category`; `None` for categories that stay in the slot.
    pub fn for_category(category: SortCategory) -> Option<Self> {
        match category {
            SortCategory::Blue => Some(MotorChannel::M1),
            SortCategory::Yellow => Some(MotorChannel::M2),
            SortCategory::Green => Some(MotorChannel::M3),
            SortCategory::NoCap | SortCategory::Error => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseOutcome {
    Completed,
    /// Shutdown cut the pulse short, or it was requested after shutdown began.
    Interrupted,
}

/// Up/Down pin pairs for M1..M3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotorPins {
    pairs: [(u32, u32); 3],
}

impl MotorPins {
    pub fn new(m1: (u32, u32), m2: (u32, u32), m3: (u32, u32)) -> Result<Self> {
        let pairs = [m1, m2, m3];
        let mut all: Vec<u32> = pairs.iter().flat_map(|(up, down)| [*up, *down]).collect();
        all.sort_unstable();
        all.dedup();
        if all.len() != 6 {
            return Err(anyhow!("motor pins must be six distinct pins, got {:?}", pairs));
        }
        Ok(Self { pairs })
    }

    pub fn from_settings(settings: &GpioSettings) -> Result<Self> {
        Self::new(
            (settings.m1_up, settings.m1_down),
            (settings.m2_up, settings.m2_down),
            (settings.m3_up, settings.m3_down),
        )
    }

    pub fn pin(&self, channel: MotorChannel, direction: Direction) -> u32 {
        let (up, down) = self.pairs[channel as usize];
        match direction {
            Direction::Up => up,
            Direction::Down => down,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = u32> + '_ {
        self.pairs.iter().flat_map(|(up, down)| [*up, *down])
    }
}

/// Drives the pin LOW when dropped.
struct PulseGuard<'a> {
    gpio: &'a SharedGpio,
    pin: u32,
}

impl Drop for PulseGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = gpio::lock(self.gpio).output(self.pin, Level::Low) {
            log::error!("actuator: failed to drive pin {} LOW: {:#}", self.pin, err);
        }
    }
}

/// Sole writer of the motor pins.
pub struct ActuatorController {
    gpio: SharedGpio,
    pins: MotorPins,
    shutdown: ShutdownSignal,
    fire_lock: Mutex<()>,
}

impl ActuatorController {
    /// Configure every motor pin as an output, driven LOW.
    pub fn new(gpio: SharedGpio, pins: MotorPins, shutdown: ShutdownSignal) -> Result<Self> {
        {
            let mut driver = gpio::lock(&gpio);
            for pin in pins.all() {
                driver.setup(pin, PinMode::Output)?;
                driver.output(pin, Level::Low)?;
            }
        }
        Ok(Self {
            gpio,
            pins,
            shutdown,
            fire_lock: Mutex::new(()),
        })
    }

    pub fn pins(&self) -> &MotorPins {
        &self.pins
    }

    /// Pulse one pin HIGH for `pulse`, then LOW.
    ///
    /// Blocks the caller for the pulse duration and while another pulse holds the lock.
    pub fn fire(
        &self,
        channel: MotorChannel,
        direction: Direction,
        pulse: Duration,
    ) -> Result<PulseOutcome> {
        let _serial = self
            .fire_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.shutdown.is_triggered() {
            log::warn!(
                "actuator: {:?} {:?} pulse skipped, shutdown in progress",
                channel,
                direction
            );
            return Ok(PulseOutcome::Interrupted);
        }

        let pin = self.pins.pin(channel, direction);
        let guard = PulseGuard {
            gpio: &self.gpio,
            pin,
        };
        let raised = gpio::lock(&self.gpio).output(pin, Level::High);
        raised?;
        log::debug!(
            "actuator: {:?} {:?} pin {} HIGH for {:?}",
            channel,
            direction,
            pin,
            pulse
        );

        let interrupted = self.shutdown.wait_timeout(pulse);
        drop(guard);

        if interrupted {
            log::warn!("actuator: {:?} {:?} pulse interrupted", channel, direction);
            Ok(PulseOutcome::Interrupted)
        } else {
            Ok(PulseOutcome::Completed)
        }
    }

    /// Drive every motor pin LOW without waiting for an in-flight pulse.
    pub fn force_safe(&self) -> Result<()> {
        let mut driver = gpio::lock(&self.gpio);
        let mut first_error = None;
        for pin in self.pins.all() {
            if let Err(err) = driver.output(pin, Level::Low) {
                log::error!("actuator: pin {} may still be HIGH: {:#}", pin, err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
