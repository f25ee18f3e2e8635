use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{
    EngineConfig, DEFAULT_ALERT_COOLDOWN, DEFAULT_BUFFER_SIZE, DEFAULT_DETECTION_THRESHOLD,
    DEFAULT_MAX_SEQUENCES, DEFAULT_SEQUENCE_RESET,
};
use crate::ingest::{CameraConfig, SourceKind};
use crate::report::{SiteIdentity, DEFAULT_QUEUE_CAPACITY};

pub const CONFIG_ENV: &str = "SMOKEWATCH_CONFIG";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_PUSH_URL: &str = "ws://localhost:3000";
const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.45;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_DETECTOR_BACKEND: &str = "tract";
const DEFAULT_CAMERA_SOURCE: &str = "0";
const DEFAULT_FRAME_WIDTH: u32 = 1280;
const DEFAULT_FRAME_HEIGHT: u32 = 720;
const DEFAULT_TARGET_FPS: u32 = 15;
const DEFAULT_ALERT_SOUND_PATH: &str = "anons.mp3";
const DEFAULT_MAX_READ_FAILURES: u32 = 30;
const DEFAULT_LOG_LEVEL: &str = "info";

const KNOWN_BACKENDS: &[&str] = &["tract", "stub"];

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    site: Option<SiteIdentity>,
    engine: Option<EngineConfigFile>,
    detector: Option<DetectorConfigFile>,
    alert: Option<AlertConfigFile>,
    report: Option<ReportConfigFile>,
    log_level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    base_url: Option<String>,
    push_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_read_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    buffer_size: Option<usize>,
    detection_threshold: Option<f64>,
    alert_cooldown_secs: Option<u64>,
    sequence_reset_secs: Option<u64>,
    max_sequences: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    sound_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ReportConfigFile {
    policy: Option<String>,
    queue_capacity: Option<usize>,
}

/// Which processed frames are sent to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportPolicy {
    /// Every frame with at least one detection.
    Detections,
    /// Only frames on which an alert fired.
    Alerts,
}

impl ReportPolicy {
    pub fn should_report(&self, has_detection: bool, alert: bool) -> bool {
        match self {
            Self::Detections => has_detection,
            Self::Alerts => alert,
        }
    }
}

impl FromStr for ReportPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detections" => Ok(Self::Detections),
            "alerts" => Ok(Self::Alerts),
            other => Err(anyhow!(
                "unknown report policy '{}'; expected detections or alerts",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api: ApiSettings,
    pub camera: CameraConfig,
    pub site: SiteIdentity,
    pub engine: EngineConfig,
    pub detector: DetectorSettings,
    pub alert: AlertSettings,
    pub report: ReportSettings,
    /// Consecutive failed frame reads before the camera is considered lost.
    pub max_read_failures: u32,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    /// `ws(s)://` or `mqtt(s)://` push endpoint.
    pub push_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub sound_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub policy: ReportPolicy,
    pub queue_capacity: usize,
}

impl ServiceConfig {
    /// Load from the file named by `SMOKEWATCH_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = env_string(CONFIG_ENV).map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ServiceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Result<Self> {
        let api = file.api.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let engine = file.engine.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let report = file.report.unwrap_or_default();

        let policy = match report.policy.as_deref() {
            Some(policy) => policy.parse()?,
            None => ReportPolicy::Detections,
        };

        Ok(Self {
            api: ApiSettings {
                base_url: api
                    .base_url
                    .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
                push_url: api.push_url.unwrap_or_else(|| DEFAULT_PUSH_URL.to_string()),
                api_key: api.api_key.filter(|key| !key.is_empty()),
            },
            camera: CameraConfig {
                source: camera
                    .source
                    .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            },
            site: file.site.unwrap_or_default(),
            engine: EngineConfig {
                buffer_size: engine.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
                detection_threshold: engine
                    .detection_threshold
                    .unwrap_or(DEFAULT_DETECTION_THRESHOLD),
                alert_cooldown: engine
                    .alert_cooldown_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_ALERT_COOLDOWN),
                sequence_reset: engine
                    .sequence_reset_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_SEQUENCE_RESET),
                max_sequences: engine.max_sequences.unwrap_or(DEFAULT_MAX_SEQUENCES),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                input_size: detector.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            },
            alert: AlertSettings {
                sound_path: alert
                    .sound_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ALERT_SOUND_PATH)),
            },
            report: ReportSettings {
                policy,
                queue_capacity: report.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            },
            max_read_failures: camera
                .max_read_failures
                .unwrap_or(DEFAULT_MAX_READ_FAILURES),
            log_level: file
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_string("API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(url) = env_string("WS_BASE_URL") {
            self.api.push_url = url;
        }
        if let Some(key) = env_string("API_KEY") {
            self.api.api_key = Some(key);
        }

        if let Some(source) = env_string("CAMERA_SOURCE") {
            self.camera.source = source;
        }
        if let Some(width) = env_parse("FRAME_WIDTH", "a pixel count")? {
            self.camera.width = width;
        }
        if let Some(height) = env_parse("FRAME_HEIGHT", "a pixel count")? {
            self.camera.height = height;
        }
        if let Some(fps) = env_parse("TARGET_FPS", "an integer frame rate")? {
            self.camera.target_fps = fps;
        }
        if let Some(limit) = env_parse("MAX_READ_FAILURES", "an integer")? {
            self.max_read_failures = limit;
        }

        if let Some(id) = env_string("CAMERA_ID") {
            self.site.camera_id = id;
        }
        if let Some(id) = env_string("VENUE_ID") {
            self.site.venue_id = id;
        }
        if let Some(id) = env_string("ZONE_ID") {
            self.site.zone_id = id;
        }
        if let Some(floor) = env_parse("FLOOR_NUMBER", "an integer")? {
            self.site.floor_number = floor;
        }

        if let Some(size) = env_parse("BUFFER_SIZE", "an integer frame count")? {
            self.engine.buffer_size = size;
        }
        if let Some(secs) = env_parse("ALERT_COOLDOWN", "an integer number of seconds")? {
            self.engine.alert_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("SEQUENCE_RESET_TIME", "an integer number of seconds")? {
            self.engine.sequence_reset = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_parse("DETECTION_THRESHOLD", "a number")? {
            self.engine.detection_threshold = threshold;
        }

        if let Some(backend) = env_string("DETECTOR_BACKEND") {
            self.detector.backend = backend.to_ascii_lowercase();
        }
        if let Some(path) = env_string("MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(threshold) = env_parse("CONFIDENCE_THRESHOLD", "a number")? {
            self.detector.confidence_threshold = threshold;
        }
        if let Some(threshold) = env_parse("IOU_THRESHOLD", "a number")? {
            self.detector.iou_threshold = threshold;
        }
        if let Some(size) = env_parse("MODEL_INPUT_SIZE", "a pixel count")? {
            self.detector.input_size = size;
        }

        if let Some(path) = env_string("ALERT_SOUND_PATH") {
            self.alert.sound_path = PathBuf::from(path);
        }
        if let Some(policy) = env_string("REPORT_POLICY") {
            self.report.policy = policy.parse()?;
        }
        if let Some(level) = env_string("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.engine.validate()?;

        url::Url::parse(&self.api.base_url)
            .map_err(|e| anyhow!("invalid API base url {}: {}", self.api.base_url, e))?;
        self.api.base_url = self.api.base_url.trim_end_matches('/').to_string();
        let push_scheme = self
            .api
            .push_url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        if !matches!(
            push_scheme.as_str(),
            "ws" | "wss" | "mqtt" | "mqtts" | "tcp" | "ssl"
        ) {
            return Err(anyhow!(
                "push url {} must use ws(s):// or mqtt(s)://",
                self.api.push_url
            ));
        }

        SourceKind::parse(&self.camera.source)?;
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        if self.max_read_failures == 0 {
            return Err(anyhow!("max read failures must be greater than zero"));
        }
        if self.site.camera_id.trim().is_empty() {
            return Err(anyhow!("camera id must not be empty"));
        }

        self.detector.backend = self.detector.backend.to_ascii_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}'; expected one of {}",
                self.detector.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold must be within 0..=1 (got {})",
                self.detector.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(anyhow!(
                "IoU threshold must be within 0..=1 (got {})",
                self.detector.iou_threshold
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        if self.detector.backend == "tract" && !self.detector.model_path.is_file() {
            return Err(anyhow!(
                "model file {} not found",
                self.detector.model_path.display()
            ));
        }

        if self.report.queue_capacity == 0 {
            return Err(anyhow!("report queue capacity must be greater than zero"));
        }
        self.log_level = self.log_level.to_ascii_lowercase();
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Non-empty, trimmed value of an environment variable.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {} (got '{}')", key, expected, value)),
        None => Ok(None),
    }
}
