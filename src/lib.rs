//! Smokewatch: camera-based smoking detection at the edge.
//!
//! Frames flow through one sequential pipeline:
//!
//! 1. `ingest` captures RGB frames from a camera source
//! 2. `preprocess` denoises and brightens the frame
//! 3. `detect` runs the detector backend and orders detections by confidence
//! 4. `engine` folds the per-frame outcome into temporal state and decides
//!    whether to alert (rolling buffer, sequence debounce, cooldown)
//! 5. `alert` raises the local alert
//! 6. `report` delivers detection events to the backend off the hot path
//!
//! `service` wires the stages together; `config` loads the settings once at
//! startup.

pub mod alert;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod engine;
pub mod frame;
pub mod ingest;
pub mod preprocess;
pub mod report;
pub mod service;

pub use alert::{build_alert_sink, AlertSink, LogAlertSink};
pub use config::{ReportPolicy, ServiceConfig};
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectionFrameResult, DetectorBackend};
pub use engine::{Decision, DecisionEngine, EngineConfig, EngineSnapshot};
pub use frame::Frame;
pub use ingest::{CameraConfig, CameraSource, FrameSource};
pub use preprocess::Preprocessor;
pub use service::{DetectionService, RunSummary};
