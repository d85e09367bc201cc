//! GPIO capability.
//!
//! Everything that touches pins goes through the [`Gpio`] trait so the controller runs the
//! same way against the kernel sysfs interface and against [`MockGpio`] on a bench or in
//! tests. Pin numbers are BCM numbers.

use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard};

mod mock;
mod sysfs;

pub use mock::MockGpio;
pub use sysfs::SysfsGpio;

use crate::config::{GpioBackendKind, GpioSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_low(self) -> bool {
        self == Level::Low
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinMode {
    Input { pull_up: bool },
    Output,
}

pub trait Gpio: Send {
    fn name(&self) -> &'static str;

    fn setup(&mut self, pin: u32, mode: PinMode) -> Result<()>;

    fn output(&mut self, pin: u32, level: Level) -> Result<()>;

    fn input(&mut self, pin: u32) -> Result<Level>;

    /// Drive every output LOW and release every pin this instance set up.
    fn cleanup(&mut self) -> Result<()>;
}

pub type SharedGpio = Arc<Mutex<dyn Gpio>>;

/// Lock the shared driver, recovering it if a previous holder panicked mid-pulse.
pub fn lock(gpio: &SharedGpio) -> MutexGuard<'_, dyn Gpio + 'static> {
    gpio.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn open_gpio(settings: &GpioSettings) -> Result<SharedGpio> {
    let gpio: SharedGpio = match settings.backend {
        GpioBackendKind::Sysfs => Arc::new(Mutex::new(SysfsGpio::new(
            &settings.sysfs_root,
            settings.pin_offset,
        )?)),
        GpioBackendKind::Stub => Arc::new(Mutex::new(MockGpio::new())),
    };
    log::info!("gpio backend: {}", lock(&gpio).name());
    Ok(gpio)
}

/// Read-only view of one input pin.
#[derive(Clone)]
pub struct InputPin {
    gpio: SharedGpio,
    pin: u32,
}

impl InputPin {
    /// Configure `pin` as an input with pull-up and return a handle to it.
    pub fn setup(gpio: SharedGpio, pin: u32) -> Result<Self> {
        lock(&gpio).setup(pin, PinMode::Input { pull_up: true })?;
        Ok(Self { gpio, pin })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn read(&self) -> Result<Level> {
        lock(&self.gpio).input(self.pin)
    }
}
