use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::detect::result::DetectionFrameResult;

use super::backend::DetectorBackend;

/// Detector backends by name, with one selected for the run loop.
///
/// The registry is owned by the single detection loop, so backends are held
/// directly rather than behind locks.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<&'static str, Box<dyn DetectorBackend>>,
    selected: Option<&'static str>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend, replacing any backend of the same name. The first
    /// backend added is selected until `set_default` says otherwise.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name();
        self.selected.get_or_insert(name);
        self.backends.insert(name, Box::new(backend));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let (&key, _) = self.backends.get_key_value(name).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        self.selected = Some(key);
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.selected
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().map(|name| name.to_string()).collect()
    }

    fn selected_mut(&mut self) -> Result<&mut Box<dyn DetectorBackend>> {
        let name = self
            .selected
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.backends
            .get_mut(name)
            .ok_or_else(|| anyhow!("detector backend '{}' missing", name))
    }

    /// Warm up the selected backend.
    pub fn warm_up(&mut self) -> Result<()> {
        let backend = self.selected_mut()?;
        let name = backend.name();
        backend
            .warm_up()
            .with_context(|| format!("warm up detector backend {}", name))
    }

    /// Run the selected backend on one frame.
    pub fn detect(&mut self, image: &RgbImage) -> Result<DetectionFrameResult> {
        let detections = self.selected_mut()?.detect(image)?;
        Ok(DetectionFrameResult::from_detections(detections))
    }
}
