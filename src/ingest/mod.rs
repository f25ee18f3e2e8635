//! Camera frame sources.
//!
//! `CameraSource` picks a backend from the configured camera source string:
//! - `stub://...`: synthetic scene, always available
//! - `0`, `1`, ... or `/dev/videoN`: local V4L2 device (feature: ingest-v4l2)
//! - `rtsp://...`: IP camera via GStreamer (feature: rtsp-gstreamer)
//! - `http(s)://...`: MJPEG stream or JPEG snapshot endpoint (feature: ingest-http)
//!
//! Every source hands out RGB `Frame`s in capture order. `Ok(None)` from
//! `next_frame` means the stream ended; an `Err` is a single failed read and
//! the caller decides whether to retry.

#[cfg(feature = "ingest-http")]
pub mod http;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[cfg(feature = "ingest-http")]
pub use http::HttpSource;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;
pub use synthetic::{SyntheticScene, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A stream of camera frames.
pub trait FrameSource: Send {
    /// Open the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame; `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Capture settings shared by every backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Frame rate cap; 0 disables pacing.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            width: 1280,
            height: 720,
            target_fps: 15,
        }
    }
}

/// Backend selected by a camera source string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    V4l2 { device: String },
    Rtsp,
    Http,
}

impl SourceKind {
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        if source.starts_with("stub://") {
            return Ok(Self::Synthetic);
        }
        if source.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::V4l2 {
                device: format!("/dev/video{}", source),
            });
        }
        if source.starts_with("/dev/video") {
            return Ok(Self::V4l2 {
                device: source.to_string(),
            });
        }
        let lower = source.to_ascii_lowercase();
        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            return Ok(Self::Rtsp);
        }
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Http);
        }
        Err(anyhow!(
            "unsupported camera source '{}'; expected stub://, a device index, /dev/video*, rtsp:// or http(s)://",
            source
        ))
    }
}

/// Frame source chosen at startup from `CameraConfig::source`.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Source),
    #[cfg(feature = "rtsp-gstreamer")]
    Rtsp(RtspSource),
    #[cfg(feature = "ingest-http")]
    Http(HttpSource),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let backend = match SourceKind::parse(&config.source)? {
            SourceKind::Synthetic => CameraBackend::Synthetic(SyntheticSource::from_config(&config)?),
            #[cfg(feature = "ingest-v4l2")]
            SourceKind::V4l2 { device } => CameraBackend::V4l2(V4l2Source::new(config, device)),
            #[cfg(not(feature = "ingest-v4l2"))]
            SourceKind::V4l2 { device } => anyhow::bail!(
                "camera device {} needs a build with `--features ingest-v4l2`; \
                 set CAMERA_SOURCE to stub://smoke, rtsp://... or http://... otherwise",
                device
            ),
            #[cfg(feature = "rtsp-gstreamer")]
            SourceKind::Rtsp => CameraBackend::Rtsp(RtspSource::new(config)?),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            SourceKind::Rtsp => anyhow::bail!("RTSP requires the rtsp-gstreamer feature"),
            #[cfg(feature = "ingest-http")]
            SourceKind::Http => CameraBackend::Http(HttpSource::new(config)),
            #[cfg(not(feature = "ingest-http"))]
            SourceKind::Http => anyhow::bail!("HTTP camera sources require the ingest-http feature"),
        };
        Ok(Self { backend })
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraBackend::Rtsp(source) => source.connect(),
            #[cfg(feature = "ingest-http")]
            CameraBackend::Http(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraBackend::Rtsp(source) => source.next_frame(),
            #[cfg(feature = "ingest-http")]
            CameraBackend::Http(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.is_healthy(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraBackend::Rtsp(source) => source.is_healthy(),
            #[cfg(feature = "ingest-http")]
            CameraBackend::Http(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraBackend::Rtsp(source) => source.stats(),
            #[cfg(feature = "ingest-http")]
            CameraBackend::Http(source) => source.stats(),
        }
    }
}

/// Minimum spacing between frames for a target rate.
pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

/// How long a source may go without a frame before it is reported unhealthy.
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

/// Capture bookkeeping shared by the sources: frame numbering, timing of
/// the last good frame and the last read error.
#[derive(Debug, Default)]
pub(crate) struct CaptureHealth {
    frames: u64,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl CaptureHealth {
    pub(crate) fn connected(&mut self) {
        self.connected_at = Some(Instant::now());
        self.last_error = None;
    }

    /// Count a good frame and return its sequence number.
    pub(crate) fn frame_captured(&mut self) -> u64 {
        let sequence = self.frames;
        self.frames += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        sequence
    }

    pub(crate) fn failed(&mut self, err: &anyhow::Error) {
        self.last_error = Some(format!("{:#}", err));
    }

    pub(crate) fn frames(&self) -> u64 {
        self.frames
    }

    pub(crate) fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    /// Sleep out the rest of the frame interval since the last good frame.
    pub(crate) fn pace(&self, target_fps: u32) {
        let interval = frame_interval(target_fps);
        if let Some(since) = self.last_frame_at.map(|last| last.elapsed()) {
            if since < interval {
                std::thread::sleep(interval - since);
            }
        }
    }

    /// Connected, no outstanding read error, and a frame (or the connection
    /// itself) within the grace period for `target_fps`.
    pub(crate) fn is_healthy(&self, target_fps: u32) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let since = self.last_frame_at.unwrap_or(connected_at);
        since.elapsed() <= health_grace(target_fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_kinds() {
        assert_eq!(SourceKind::parse("stub://smoke").ok(), Some(SourceKind::Synthetic));
        assert_eq!(
            SourceKind::parse("0").ok(),
            Some(SourceKind::V4l2 {
                device: "/dev/video0".to_string()
            })
        );
        assert_eq!(
            SourceKind::parse("/dev/video2").ok(),
            Some(SourceKind::V4l2 {
                device: "/dev/video2".to_string()
            })
        );
        assert_eq!(SourceKind::parse("rtsp://10.0.0.5/stream").ok(), Some(SourceKind::Rtsp));
        assert_eq!(SourceKind::parse("HTTP://cam.local/mjpeg").ok(), Some(SourceKind::Http));
    }

    #[test]
    fn rejects_unknown_sources() {
        assert!(SourceKind::parse("").is_err());
        assert!(SourceKind::parse("ftp://cam").is_err());
        assert!(SourceKind::parse("video.mp4").is_err());
    }

    #[test]
    fn camera_source_builds_synthetic_backend() -> Result<()> {
        let mut source = CameraSource::new(CameraConfig {
            source: "stub://smoke?frames=2".to_string(),
            width: 64,
            height: 48,
            target_fps: 0,
        })?;
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn local_device_without_v4l2_names_the_feature() {
        let err = CameraSource::new(CameraConfig::default()).err().expect("v4l2 disabled");
        let message = err.to_string();
        assert!(message.contains("/dev/video0"));
        assert!(message.contains("--features ingest-v4l2"));
    }

    #[test]
    fn frame_interval_handles_zero_rate() {
        assert_eq!(frame_interval(0), Duration::ZERO);
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(health_grace(0), Duration::from_secs(2));
        assert_eq!(health_grace(1), Duration::from_secs(6));
    }

    #[test]
    fn capture_health_tracks_frames_and_errors() {
        let mut health = CaptureHealth::default();
        assert!(!health.is_healthy(15));

        health.connected();
        assert!(health.is_healthy(15));
        assert_eq!(health.frame_captured(), 0);
        assert_eq!(health.frame_captured(), 1);
        assert_eq!(health.frames(), 2);
        assert!(health.last_frame_at().is_some());

        health.failed(&anyhow!("timeout"));
        assert!(!health.is_healthy(15));
        health.frame_captured();
        assert!(health.is_healthy(15));
    }
}
