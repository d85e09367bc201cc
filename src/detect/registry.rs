use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;
use crate::frame::Frame;

use super::backend::DetectorBackend;

pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!(
                "classifier backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run detection on the default backend.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no classifier backend registered"))?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.detect(frame)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        let first = ScriptedBackend::new();
        first.script().push(vec![Detection::labelled("Coke", 0.9)]);
        registry.register(first);

        let frame = Frame::blank(2, 2, 0)?;
        let found = registry.detect(&frame)?;
        assert_eq!(found[0].class_name, "Coke");
        assert_eq!(registry.list(), vec!["stub".to_string()]);
        Ok(())
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::new());
        let err = registry.set_default("tract").unwrap_err();
        assert!(err.to_string().contains("available: stub"));
    }

    #[test]
    fn empty_registry_cannot_detect() {
        let registry = BackendRegistry::new();
        let frame = Frame::blank(2, 2, 0).unwrap();
        assert!(registry.detect(&frame).is_err());
    }
}
