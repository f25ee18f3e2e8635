use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};

/// Minimum channel value for a pixel to count as a marker.
const MARKER_LEVEL: u8 = 250;
/// Marker pixels needed before anything is reported.
const MIN_MARKER_PIXELS: usize = 16;

/// Stub backend for testing and bench runs without a model.
///
/// Reports one detection covering all near-white pixels in the frame. The
/// confidence is the fraction of that box filled by marker pixels, so a solid
/// patch scores close to 1.0 and scattered noise scores low.
pub struct StubBackend {
    confidence_threshold: f32,
}

impl StubBackend {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(0.45)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let mut count = 0usize;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);

        for (x, y, pixel) in image.enumerate_pixels() {
            if pixel.0.iter().all(|&c| c >= MARKER_LEVEL) {
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        if count < MIN_MARKER_PIXELS {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as i32,
            min_y as i32,
            max_x as i32 + 1,
            max_y as i32 + 1,
        );
        let confidence = (count as f64 / bbox.area() as f64).clamp(0.0, 1.0) as f32;
        if confidence < self.confidence_threshold {
            return Ok(Vec::new());
        }
        Ok(vec![Detection::new(bbox, confidence)])
    }
}
