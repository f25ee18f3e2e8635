//! Frame conditioning applied before detection.
//!
//! A light Gaussian blur (3x3 kernel equivalent) suppresses sensor noise,
//! then a linear contrast/brightness lift `v' = alpha * v + beta` brightens
//! dim indoor scenes. Results saturate at 0 and 255.

use image::imageops;
use image::RgbImage;

/// Sigma matching a 3x3 Gaussian kernel.
pub const DEFAULT_BLUR_SIGMA: f32 = 0.8;
pub const DEFAULT_ALPHA: f32 = 1.1;
pub const DEFAULT_BETA: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Preprocessor {
    /// 0 disables the blur.
    pub blur_sigma: f32,
    pub alpha: f32,
    pub beta: f32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            blur_sigma: DEFAULT_BLUR_SIGMA,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
        }
    }
}

impl Preprocessor {
    /// Produce the detector input for a captured frame. The input is not modified.
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let mut output = if self.blur_sigma > 0.0 {
            imageops::blur(image, self.blur_sigma)
        } else {
            image.clone()
        };
        scale_levels(&mut output, self.alpha, self.beta);
        output
    }
}

/// In-place `alpha * v + beta` on every channel, rounded and saturated.
pub fn scale_levels(image: &mut RgbImage, alpha: f32, beta: f32) {
    let mut lut = [0u8; 256];
    for (value, slot) in lut.iter_mut().enumerate() {
        *slot = (alpha * value as f32 + beta).abs().round().clamp(0.0, 255.0) as u8;
    }
    for channel in image.iter_mut() {
        *channel = lut[*channel as usize];
    }
}
