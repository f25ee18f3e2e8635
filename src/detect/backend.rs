use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// A person/cigarette detector the run loop can drive.
///
/// `detect` maps one preprocessed RGB frame to the detections whose
/// confidence is at or above the backend's own threshold, with boxes in the
/// pixel space of the image it was given. The call may be slow but must not
/// keep the image past its return.
pub trait DetectorBackend: Send {
    /// Name used by `DETECTOR_BACKEND` and in logs.
    fn name(&self) -> &'static str;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// Called once before the first frame; model loading errors surface here.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
