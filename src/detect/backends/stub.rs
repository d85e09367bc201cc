use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

enum ScriptStep {
    Detections(Vec<Detection>),
    Failure(String),
    Panic(String),
}

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<ScriptStep>,
    fallback: Vec<Detection>,
    calls: u64,
}

/// Stub backend for bench runs and tests.
///
/// Each `detect` call consumes the next scripted step. Once the script is exhausted the
/// fallback list (empty unless configured) is returned for every call.
pub struct ScriptedBackend {
    script: ScriptHandle,
}

/// Shared handle for feeding a `ScriptedBackend` after it has been registered.
#[derive(Clone, Default)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the result of one future `detect` call.
    pub fn push(&self, detections: Vec<Detection>) {
        self.lock().queue.push_back(ScriptStep::Detections(detections));
    }

    /// Queue a failing `detect` call.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock().queue.push_back(ScriptStep::Failure(message.into()));
    }

    /// Queue a `detect` call that panics.
    pub fn push_panic(&self, message: impl Into<String>) {
        self.lock().queue.push_back(ScriptStep::Panic(message.into()));
    }

    /// Result returned once the queue is empty.
    pub fn set_fallback(&self, detections: Vec<Detection>) {
        self.lock().fallback = detections;
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> u64 {
        self.lock().calls
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: ScriptHandle::default(),
        }
    }

    /// Backend that answers every call with the same classes at full confidence.
    pub fn with_fixed_classes(classes: &[String]) -> Self {
        let backend = Self::new();
        backend.script.set_fallback(
            classes
                .iter()
                .map(|class| Detection::labelled(class.clone(), 1.0))
                .collect(),
        );
        backend
    }

    pub fn script(&self) -> ScriptHandle {
        self.script.clone()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let mut state = self.script.lock();
        state.calls += 1;
        let step = state.queue.pop_front();
        match step {
            Some(ScriptStep::Detections(detections)) => Ok(detections),
            Some(ScriptStep::Failure(message)) => Err(anyhow!(message)),
            Some(ScriptStep::Panic(message)) => {
                drop(state);
                panic!("{}", message)
            }
            None => Ok(state.fallback.clone()),
        }
    }

    fn warm_up(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}
