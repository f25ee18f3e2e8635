//! Report image encoding: half-size JPEG, base64.

use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::annotate::annotate;
use crate::detect::DetectionFrameResult;
use crate::report::event::ImageData;

pub const REPORT_IMAGE_SCALE: f32 = 0.5;
pub const REPORT_JPEG_QUALITY: u8 = 60;

/// Downscale, JPEG-encode and base64-encode one image.
pub fn encode_report_image(image: &RgbImage) -> Result<String> {
    let width = ((image.width() as f32 * REPORT_IMAGE_SCALE).round() as u32).max(1);
    let height = ((image.height() as f32 * REPORT_IMAGE_SCALE).round() as u32).max(1);
    let small = imageops::resize(image, width, height, FilterType::Triangle);

    let mut jpeg = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut jpeg, REPORT_JPEG_QUALITY)
        .encode_image(&small)
        .context("encode report jpeg")?;
    Ok(STANDARD.encode(jpeg.into_inner()))
}

/// The three images attached to a detection event.
pub struct FrameImages {
    pub original: RgbImage,
    pub processed: RgbImage,
}

impl FrameImages {
    /// Encode the raw frame, the detector input and an annotated copy of
    /// the raw frame.
    pub fn encode(&self, result: &DetectionFrameResult) -> Result<ImageData> {
        let annotated = annotate(&self.original, result);
        Ok(ImageData {
            original_image: encode_report_image(&self.original)?,
            processed_image: encode_report_image(&self.processed)?,
            annotated_image: encode_report_image(&annotated)?,
            confidence: result.top_confidence(),
        })
    }
}
