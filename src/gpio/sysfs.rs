//! Kernel sysfs GPIO driver (`/sys/class/gpio`).

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{Gpio, Level, PinMode};

/// udev may take a moment to fix permissions on a freshly exported pin.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(1);

struct ExportedPin {
    mode: PinMode,
    exported_here: bool,
}

pub struct SysfsGpio {
    root: PathBuf,
    pin_offset: u32,
    pins: BTreeMap<u32, ExportedPin>,
}

impl SysfsGpio {
    pub fn new(root: impl AsRef<Path>, pin_offset: u32) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(anyhow!(
                "gpio sysfs root {} not found (is this a GPIO-capable board?)",
                root.display()
            ));
        }
        Ok(Self {
            root,
            pin_offset,
            pins: BTreeMap::new(),
        })
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin + self.pin_offset))
    }

    fn write_attr(&self, pin: u32, attr: &str, value: &str) -> Result<()> {
        let path = self.pin_dir(pin).join(attr);
        std::fs::write(&path, value)
            .with_context(|| format!("write '{}' to {}", value, path.display()))
    }

    fn export(&self, pin: u32) -> Result<bool> {
        let dir = self.pin_dir(pin);
        if dir.exists() {
            return Ok(false);
        }
        let export = self.root.join("export");
        std::fs::write(&export, (pin + self.pin_offset).to_string())
            .with_context(|| format!("export gpio {} via {}", pin, export.display()))?;

        let deadline = Instant::now() + EXPORT_TIMEOUT;
        while !dir.join("value").exists() {
            if Instant::now() >= deadline {
                return Err(anyhow!("gpio {} did not appear after export", pin));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(true)
    }

    fn unexport(&self, pin: u32) -> Result<()> {
        let unexport = self.root.join("unexport");
        std::fs::write(&unexport, (pin + self.pin_offset).to_string())
            .with_context(|| format!("unexport gpio {}", pin))
    }
}

impl Gpio for SysfsGpio {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn setup(&mut self, pin: u32, mode: PinMode) -> Result<()> {
        let exported_here = match self.pins.get(&pin) {
            Some(existing) => existing.exported_here,
            None => self.export(pin)?,
        };
        match mode {
            // "low" sets direction and initial value in one write, so the pin never glitches HIGH.
            PinMode::Output => self.write_attr(pin, "direction", "low")?,
            PinMode::Input { pull_up } => {
                self.write_attr(pin, "direction", "in")?;
                if pull_up {
                    log::debug!("gpio {}: sysfs cannot set pull-ups; relying on board wiring", pin);
                }
            }
        }
        self.pins.insert(
            pin,
            ExportedPin {
                mode,
                exported_here,
            },
        );
        Ok(())
    }

    fn output(&mut self, pin: u32, level: Level) -> Result<()> {
        match self.pins.get(&pin) {
            Some(ExportedPin {
                mode: PinMode::Output,
                ..
            }) => {}
            _ => return Err(anyhow!("gpio {} is not set up as an output", pin)),
        }
        let value = match level {
            Level::Low => "0",
            Level::High => "1",
        };
        self.write_attr(pin, "value", value)
    }

    fn input(&mut self, pin: u32) -> Result<Level> {
        if !self.pins.contains_key(&pin) {
            return Err(anyhow!("gpio {} is not set up", pin));
        }
        let path = self.pin_dir(pin).join("value");
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(anyhow!("unexpected gpio value '{}' in {}", other, path.display())),
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        let mut first_error = None;
        let pins = std::mem::take(&mut self.pins);
        for (pin, state) in pins.iter() {
            let mut result = Ok(());
            if state.mode == PinMode::Output {
                result = self.write_attr(*pin, "value", "0");
            }
            if state.exported_here {
                result = result.and(self.unexport(*pin));
            }
            if let Err(err) = result {
                log::warn!("gpio {}: cleanup failed: {:#}", pin, err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_root(pins: &[u32]) -> Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        for pin in pins {
            let pin_dir = dir.path().join(format!("gpio{}", pin));
            std::fs::create_dir(&pin_dir)?;
            std::fs::write(pin_dir.join("value"), "1\n")?;
            std::fs::write(pin_dir.join("direction"), "in\n")?;
        }
        Ok(dir)
    }

    fn read(dir: &Path, pin: u32, attr: &str) -> String {
        std::fs::read_to_string(dir.join(format!("gpio{}", pin)).join(attr)).unwrap()
    }

    #[test]
    fn outputs_start_low_and_follow_writes() -> Result<()> {
        let root = fake_root(&[4])?;
        let mut gpio = SysfsGpio::new(root.path(), 0)?;
        gpio.setup(4, PinMode::Output)?;
        assert_eq!(read(root.path(), 4, "direction"), "low");

        gpio.output(4, Level::High)?;
        assert_eq!(read(root.path(), 4, "value"), "1");
        gpio.cleanup()?;
        assert_eq!(read(root.path(), 4, "value"), "0");
        Ok(())
    }

    #[test]
    fn reads_inputs_and_applies_offset() -> Result<()> {
        let root = fake_root(&[524])?;
        let mut gpio = SysfsGpio::new(root.path(), 512)?;
        gpio.setup(12, PinMode::Input { pull_up: true })?;
        assert_eq!(gpio.input(12)?, Level::High);
        std::fs::write(root.path().join("gpio524/value"), "0\n")?;
        assert_eq!(gpio.input(12)?, Level::Low);
        Ok(())
    }

    #[test]
    fn rejects_writes_to_unconfigured_pins() -> Result<()> {
        let root = fake_root(&[12])?;
        let mut gpio = SysfsGpio::new(root.path(), 0)?;
        assert!(gpio.output(12, Level::High).is_err());
        gpio.setup(12, PinMode::Input { pull_up: false })?;
        assert!(gpio.output(12, Level::High).is_err());
        Ok(())
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(SysfsGpio::new("/nonexistent/gpio", 0).is_err());
    }
}
