//! Detection overlays for the annotated report image.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::{BoundingBox, DetectionFrameResult};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BAR_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 3;
const BAR_HEIGHT: u32 = 6;
const BAR_GAP: i32 = 2;

/// Copy `image` and draw every detection: a red box plus a bar above it whose
/// filled length is proportional to the confidence.
pub fn annotate(image: &RgbImage, result: &DetectionFrameResult) -> RgbImage {
    let mut canvas = image.clone();
    for detection in result.detections() {
        draw_box(&mut canvas, &detection.bbox);
        draw_confidence_bar(&mut canvas, &detection.bbox, detection.confidence);
    }
    canvas
}

fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox) {
    for inset in 0..BOX_THICKNESS {
        let width = bbox.width() - 2 * inset;
        let height = bbox.height() - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    }
}

fn draw_confidence_bar(canvas: &mut RgbImage, bbox: &BoundingBox, confidence: f32) {
    let width = bbox.width();
    if width <= 0 {
        return;
    }
    // Above the box when there is room, otherwise just inside its top edge.
    let above = bbox.y1 - BAR_GAP - BAR_HEIGHT as i32;
    let y = if above >= 0 { above } else { bbox.y1 + BOX_THICKNESS };

    let background = Rect::at(bbox.x1, y).of_size(width as u32, BAR_HEIGHT);
    draw_filled_rect_mut(canvas, background, BAR_BACKGROUND);

    let filled = (width as f32 * confidence.clamp(0.0, 1.0)).round() as u32;
    if filled > 0 {
        let bar = Rect::at(bbox.x1, y).of_size(filled, BAR_HEIGHT);
        draw_filled_rect_mut(canvas, bar, BOX_COLOR);
    }
}
