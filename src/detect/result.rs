use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Axis-aligned box in frame pixel coordinates (`x2`/`y2` exclusive).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    /// Intersection over union; 0 when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = BoundingBox::new(ix1, iy1, ix2, iy2).area();
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f32 / union as f32
    }
}

/// One detector hit above the confidence threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }
}

/// Per-frame detection outcome. Immutable once built.
///
/// Detections are held in descending confidence order, so the primary
/// detection is also the most confident one.
#[derive(Clone, Debug, Default)]
pub struct DetectionFrameResult {
    detections: Vec<Detection>,
}

impl DetectionFrameResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_detections(mut detections: Vec<Detection>) -> Self {
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        Self { detections }
    }

    pub fn has_detection(&self) -> bool {
        !self.detections.is_empty()
    }

    /// Highest confidence in the frame, 0 when nothing was detected.
    pub fn top_confidence(&self) -> f32 {
        self.primary().map(|d| d.confidence).unwrap_or(0.0)
    }

    pub fn primary(&self) -> Option<&Detection> {
        self.detections.first()
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn bounding_boxes(&self) -> impl Iterator<Item = BoundingBox> + '_ {
        self.detections.iter().map(|d| d.bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_is_most_confident() {
        let result = DetectionFrameResult::from_detections(vec![
            Detection::new(BoundingBox::new(0, 0, 10, 10), 0.5),
            Detection::new(BoundingBox::new(5, 5, 20, 20), 0.9),
            Detection::new(BoundingBox::new(1, 1, 3, 3), 0.6),
        ]);
        assert!(result.has_detection());
        assert_eq!(result.top_confidence(), 0.9);
        assert_eq!(
            result.primary().map(|d| d.bbox),
            Some(BoundingBox::new(5, 5, 20, 20))
        );
        assert_eq!(result.bounding_boxes().count(), 3);
    }

    #[test]
    fn empty_result_has_zero_confidence() {
        let result = DetectionFrameResult::empty();
        assert!(!result.has_detection());
        assert_eq!(result.top_confidence(), 0.0);
        assert!(result.primary().is_none());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 30, 30);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 0.0);

        let c = BoundingBox::new(5, 0, 15, 10);
        assert!((a.iou(&c) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.center(), (5, 5));
    }
}
