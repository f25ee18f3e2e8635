//! Detection event wire model, as accepted by `POST /detections` and the push
//! channel. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, DetectionFrameResult};
use crate::engine::EngineSnapshot;

/// Where the camera is mounted. Fixed for the process lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteIdentity {
    pub venue_id: String,
    pub floor_number: i32,
    pub zone_id: String,
    pub camera_id: String,
}

impl Default for SiteIdentity {
    fn default() -> Self {
        Self {
            venue_id: "1".to_string(),
            floor_number: 1,
            zone_id: "1".to_string(),
            camera_id: "1".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub venue_id: String,
    pub floor_number: i32,
    pub zone_id: String,
    pub camera_id: String,
    pub location: EventLocation,
    pub detection_details: DetectionDetails,
    pub image_data: ImageData,
    pub system_metrics: SystemMetrics,
}

/// Primary detection; `x`/`y` is the box centre in frame pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLocation {
    pub x: i32,
    pub y: i32,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionDetails {
    pub confidence: f32,
    /// Rolling buffer length at the time of the frame.
    pub detection_sequences: usize,
    pub fps: f64,
}

/// Base64 JPEG payloads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub original_image: String,
    pub processed_image: String,
    pub annotated_image: String,
    pub confidence: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub detection_rate: f64,
    pub total_detections: u64,
    /// Seconds since the engine started.
    pub elapsed_time: f64,
}

impl SystemMetrics {
    pub fn new(cpu_percent: f32, ram_percent: f32, snapshot: &EngineSnapshot) -> Self {
        Self {
            cpu_percent,
            ram_percent,
            detection_rate: snapshot.detection_rate,
            total_detections: snapshot.total_detections,
            elapsed_time: snapshot.elapsed.as_secs_f64(),
        }
    }
}

impl DetectionEvent {
    /// Assemble an event for one processed frame.
    ///
    /// A frame without detections (possible when an alert fires on a gap
    /// frame) reports an empty box at the origin with zero confidence.
    pub fn build(
        site: &SiteIdentity,
        result: &DetectionFrameResult,
        snapshot: &EngineSnapshot,
        image_data: ImageData,
        system_metrics: SystemMetrics,
    ) -> Self {
        let (bbox, confidence) = match result.primary() {
            Some(primary) => (primary.bbox, primary.confidence),
            None => (BoundingBox::new(0, 0, 0, 0), 0.0),
        };
        let (x, y) = bbox.center();

        Self {
            venue_id: site.venue_id.clone(),
            floor_number: site.floor_number,
            zone_id: site.zone_id.clone(),
            camera_id: site.camera_id.clone(),
            location: EventLocation {
                x,
                y,
                bounding_box: bbox,
                confidence,
            },
            detection_details: DetectionDetails {
                confidence,
                detection_sequences: snapshot.buffer_len,
                fps: snapshot.fps,
            },
            image_data,
            system_metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;
    use std::time::Duration;

    fn snapshot() -> EngineSnapshot {
        EngineSnapshot {
            buffer_len: 12,
            buffer_ratio: Some(0.75),
            sequence_count: 1,
            frame_count: 300,
            total_detections: 40,
            fps: 14.5,
            detection_rate: 2.0,
            elapsed: Duration::from_secs(20),
        }
    }

    #[test]
    fn serializes_camel_case_payload() {
        let result = DetectionFrameResult::from_detections(vec![
            Detection::new(BoundingBox::new(100, 50, 140, 90), 0.62),
            Detection::new(BoundingBox::new(10, 10, 20, 20), 0.91),
        ]);
        let event = DetectionEvent::build(
            &SiteIdentity::default(),
            &result,
            &snapshot(),
            ImageData {
                confidence: 0.91,
                ..ImageData::default()
            },
            SystemMetrics::new(12.5, 40.0, &snapshot()),
        );

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["venueId"], "1");
        assert_eq!(json["floorNumber"], 1);
        assert_eq!(json["location"]["x"], 15);
        assert_eq!(json["location"]["y"], 15);
        assert_eq!(json["location"]["boundingBox"]["x2"], 20);
        assert_eq!(json["detectionDetails"]["detectionSequences"], 12);
        assert_eq!(json["systemMetrics"]["totalDetections"], 40);
        assert_eq!(json["systemMetrics"]["elapsedTime"], 20.0);
        assert!(json["imageData"].get("annotatedImage").is_some());
    }

    #[test]
    fn frame_without_detections_reports_zero_location() {
        let event = DetectionEvent::build(
            &SiteIdentity::default(),
            &DetectionFrameResult::empty(),
            &snapshot(),
            ImageData::default(),
            SystemMetrics::default(),
        );
        assert_eq!(event.location.bounding_box, BoundingBox::new(0, 0, 0, 0));
        assert_eq!(event.location.confidence, 0.0);
        assert_eq!(event.detection_details.fps, 14.5);
    }
}
