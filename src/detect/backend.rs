use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector used by the trigger loop.
///
/// Implementations are treated as possibly slow and possibly failing. The trigger loop
/// calls `detect` synchronously on the sensor thread and turns any error into an empty
/// detection list.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Backends may pre-filter by their own confidence threshold; the category resolver
    /// applies its threshold again regardless.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the first trigger.
    fn warm_up(&mut self, frame: &Frame) -> Result<()> {
        self.detect(frame).map(|_| ())
    }
}
