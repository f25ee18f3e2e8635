//! YOLOv8-style output decoding.
//!
//! The detection head emits a `[1, 4 + classes, anchors]` tensor: box centre,
//! width and height in model-input pixels followed by one score per class.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

const CXYWH_OFFSET: usize = 4;

/// Parameters mapping model-input space back to the source frame.
#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Source frame width / model input width.
    pub scale_x: f32,
    /// Source frame height / model input height.
    pub scale_y: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Decode a channel-major prediction tensor into frame-space detections,
/// applying the confidence threshold and non-maximum suppression.
pub fn decode_predictions(
    data: &[f32],
    channels: usize,
    anchors: usize,
    params: &DecodeParams,
) -> Result<Vec<Detection>> {
    if channels <= CXYWH_OFFSET {
        return Err(anyhow!(
            "prediction tensor has {} channels; expected at least {}",
            channels,
            CXYWH_OFFSET + 1
        ));
    }
    let expected = channels
        .checked_mul(anchors)
        .ok_or_else(|| anyhow!("prediction tensor dimensions overflow"))?;
    if data.len() != expected {
        return Err(anyhow!(
            "prediction tensor has {} values; expected {}",
            data.len(),
            expected
        ));
    }

    let at = |channel: usize, anchor: usize| data[channel * anchors + anchor];
    let max_x = params.frame_width as f32;
    let max_y = params.frame_height as f32;

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let confidence = (CXYWH_OFFSET..channels)
            .map(|c| at(c, anchor))
            .fold(f32::NEG_INFINITY, f32::max);
        if !confidence.is_finite() || confidence < params.confidence_threshold {
            continue;
        }

        let cx = at(0, anchor) * params.scale_x;
        let cy = at(1, anchor) * params.scale_y;
        let w = at(2, anchor) * params.scale_x;
        let h = at(3, anchor) * params.scale_y;
        let x1 = (cx - w / 2.0).clamp(0.0, max_x);
        let y1 = (cy - h / 2.0).clamp(0.0, max_y);
        let x2 = (cx + w / 2.0).clamp(0.0, max_x);
        let y2 = (cy + h / 2.0).clamp(0.0, max_y);

        let bbox = BoundingBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32);
        if bbox.area() == 0 {
            continue;
        }
        detections.push(Detection::new(bbox, confidence));
    }

    non_max_suppression(&mut detections, params.iou_threshold);
    Ok(detections)
}

/// Greedy NMS. Leaves `detections` sorted by descending confidence.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept)
            .any(|prev| detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold);
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DecodeParams {
        DecodeParams {
            confidence_threshold: 0.45,
            iou_threshold: 0.45,
            scale_x: 2.0,
            scale_y: 1.0,
            frame_width: 1280,
            frame_height: 640,
        }
    }

    /// Build a `[5, anchors]` single-class tensor from (cx, cy, w, h, score).
    fn tensor(rows: &[(f32, f32, f32, f32, f32)]) -> Vec<f32> {
        let anchors = rows.len();
        let mut data = vec![0.0; 5 * anchors];
        for (i, (cx, cy, w, h, score)) in rows.iter().enumerate() {
            data[i] = *cx;
            data[anchors + i] = *cy;
            data[2 * anchors + i] = *w;
            data[3 * anchors + i] = *h;
            data[4 * anchors + i] = *score;
        }
        data
    }

    #[test]
    fn decodes_and_scales_boxes() {
        let data = tensor(&[(100.0, 100.0, 20.0, 40.0, 0.9), (300.0, 300.0, 10.0, 10.0, 0.2)]);
        let detections = decode_predictions(&data, 5, 2, &params()).expect("decode");

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(180, 80, 220, 120));
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn suppresses_overlapping_boxes() {
        let data = tensor(&[
            (100.0, 100.0, 40.0, 40.0, 0.6),
            (102.0, 101.0, 40.0, 40.0, 0.8),
            (400.0, 400.0, 40.0, 40.0, 0.5),
        ]);
        let detections = decode_predictions(&data, 5, 3, &params()).expect("decode");

        assert_eq!(detections.len(), 2);
        assert!((detections[0].confidence - 0.8).abs() < 1e-6);
        assert!((detections[1].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn clamps_to_frame_bounds() {
        let data = tensor(&[(2.0, 2.0, 20.0, 20.0, 0.7)]);
        let detections = decode_predictions(&data, 5, 1, &params()).expect("decode");
        assert_eq!(detections[0].bbox.x1, 0);
        assert_eq!(detections[0].bbox.y1, 0);
    }

    #[test]
    fn rejects_mismatched_tensor() {
        assert!(decode_predictions(&[0.0; 9], 5, 2, &params()).is_err());
        assert!(decode_predictions(&[0.0; 8], 4, 2, &params()).is_err());
    }
}
