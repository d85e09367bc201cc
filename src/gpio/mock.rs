use anyhow::{anyhow, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Gpio, Level, PinMode};

#[derive(Default)]
struct MockState {
    modes: HashMap<u32, PinMode>,
    outputs: HashMap<u32, Level>,
    history: Vec<(u32, Level)>,
    queued_inputs: HashMap<u32, VecDeque<Level>>,
    steady_inputs: HashMap<u32, Level>,
    high_outputs: usize,
    max_concurrent_high: usize,
    fail_writes: bool,
    cleanups: u32,
}

/// In-memory GPIO for bench runs and tests.
///
/// Clones share state, so a test can keep one handle while the controller owns another.
/// Unscripted inputs read HIGH (sensor released).
#[derive(Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<MockState>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Levels returned by the next reads of `pin`, in order.
    pub fn queue_inputs(&self, pin: u32, levels: &[Level]) {
        self.lock()
            .queued_inputs
            .entry(pin)
            .or_default()
            .extend(levels.iter().copied());
    }

    /// Level returned once the queue for `pin` is empty.
    pub fn set_input(&self, pin: u32, level: Level) {
        self.lock().steady_inputs.insert(pin, level);
    }

    pub fn level(&self, pin: u32) -> Option<Level> {
        self.lock().outputs.get(&pin).copied()
    }

    pub fn mode(&self, pin: u32) -> Option<PinMode> {
        self.lock().modes.get(&pin).copied()
    }

    /// Every output write, in order.
    pub fn history(&self) -> Vec<(u32, Level)> {
        self.lock().history.clone()
    }

    /// Pins written HIGH, in order.
    pub fn pulses(&self) -> Vec<u32> {
        self.lock()
            .history
            .iter()
            .filter(|(_, level)| *level == Level::High)
            .map(|(pin, _)| *pin)
            .collect()
    }

    /// Largest number of outputs that were HIGH at the same time.
    pub fn max_concurrent_high(&self) -> usize {
        self.lock().max_concurrent_high
    }

    pub fn all_outputs_low(&self) -> bool {
        self.lock().outputs.values().all(|level| *level == Level::Low)
    }

    /// Make every later `output` call fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn cleanups(&self) -> u32 {
        self.lock().cleanups
    }
}

impl Gpio for MockGpio {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn setup(&mut self, pin: u32, mode: PinMode) -> Result<()> {
        let mut state = self.lock();
        state.modes.insert(pin, mode);
        if mode == PinMode::Output {
            if state.outputs.insert(pin, Level::Low) == Some(Level::High) {
                state.high_outputs -= 1;
            }
        }
        Ok(())
    }

    fn output(&mut self, pin: u32, level: Level) -> Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(anyhow!("mock gpio: write to pin {} failed", pin));
        }
        if state.modes.get(&pin) != Some(&PinMode::Output) {
            return Err(anyhow!("gpio {} is not set up as an output", pin));
        }
        let previous = state.outputs.insert(pin, level);
        match (previous, level) {
            (Some(Level::High), Level::Low) => state.high_outputs -= 1,
            (Some(Level::Low) | None, Level::High) => state.high_outputs += 1,
            _ => {}
        }
        state.max_concurrent_high = state.max_concurrent_high.max(state.high_outputs);
        state.history.push((pin, level));
        Ok(())
    }

    fn input(&mut self, pin: u32) -> Result<Level> {
        let mut state = self.lock();
        if !matches!(state.modes.get(&pin), Some(PinMode::Input { .. })) {
            return Err(anyhow!("gpio {} is not set up as an input", pin));
        }
        if let Some(level) = state.queued_inputs.get_mut(&pin).and_then(VecDeque::pop_front) {
            return Ok(level);
        }
        Ok(state.steady_inputs.get(&pin).copied().unwrap_or(Level::High))
    }

    fn cleanup(&mut self) -> Result<()> {
        let mut state = self.lock();
        for level in state.outputs.values_mut() {
            *level = Level::Low;
        }
        state.high_outputs = 0;
        state.modes.clear();
        state.cleanups += 1;
        Ok(())
    }
}
