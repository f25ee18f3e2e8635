//! Captured frames.
//!
//! A `Frame` owns one RGB image plus its capture metadata. Sources hand out
//! frames in capture order; the sequence number is per source and starts at 0.

use std::time::Instant;

use anyhow::{anyhow, Result};
use image::RgbImage;

pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
    sequence: u64,
}

impl Frame {
    /// Stamp a freshly captured image with the current instant.
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self::with_capture_time(image, sequence, Instant::now())
    }

    pub fn with_capture_time(image: RgbImage, sequence: u64, captured_at: Instant) -> Self {
        Self {
            image,
            captured_at,
            sequence,
        }
    }

    /// Build a frame from tightly packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("invalid RGB buffer for {}x{}", width, height))?;
        Ok(Self::new(image, sequence))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
