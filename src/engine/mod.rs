//! Temporal detection decision engine.
//!
//! One `DecisionEngine` exists per monitored stream. It is fed once per
//! processed frame, in arrival order, and decides whether the recent history
//! of detections is alert-worthy:
//! - `RollingBuffer`: presence flags of the last N frames
//! - `SequenceTracker`: detect→lose transitions within a reset window
//! - `AlertCooldown`: minimum spacing between fired alerts
//! - `FrameMetrics`: frame/detection counters and fps
//!
//! Every operation here is infallible. Firing the alert is the caller's job;
//! the caller reports back through `record_alert`.

mod buffer;
mod cooldown;
mod metrics;
mod sequence;

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

pub use buffer::RollingBuffer;
pub use cooldown::AlertCooldown;
pub use metrics::{FrameMetrics, FPS_WINDOW_FRAMES};
pub use sequence::SequenceTracker;

use crate::detect::DetectionFrameResult;

pub const DEFAULT_BUFFER_SIZE: usize = 15;
pub const DEFAULT_DETECTION_THRESHOLD: f64 = 0.7;
pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(10);
pub const DEFAULT_SEQUENCE_RESET: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_SEQUENCES: u32 = 3;

/// Tunables for a `DecisionEngine`. Fixed for the engine's lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Rolling buffer capacity in frames.
    pub buffer_size: usize,
    /// Minimum buffer ratio (inclusive) for an alert.
    pub detection_threshold: f64,
    /// Alerts are suppressed until strictly more than this has elapsed.
    pub alert_cooldown: Duration,
    /// Sequence window length.
    pub sequence_reset: Duration,
    /// Alerts are suppressed once the sequence count exceeds this.
    pub max_sequences: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            alert_cooldown: DEFAULT_ALERT_COOLDOWN,
            sequence_reset: DEFAULT_SEQUENCE_RESET,
            max_sequences: DEFAULT_MAX_SEQUENCES,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(anyhow!("buffer size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(anyhow!(
                "detection threshold must be within 0..=1 (got {})",
                self.detection_threshold
            ));
        }
        Ok(())
    }
}

/// Outcome of one update cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    /// The caller should fire the alert sink and call `record_alert`.
    pub alert: bool,
    pub buffer_ratio: Option<f64>,
    pub sequence_count: u32,
    /// fps was recomputed on this frame.
    pub fps_updated: bool,
}

/// Read-only copy of engine state, safe to hand to reporting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineSnapshot {
    pub buffer_len: usize,
    pub buffer_ratio: Option<f64>,
    pub sequence_count: u32,
    pub frame_count: u64,
    pub total_detections: u64,
    pub fps: f64,
    pub detection_rate: f64,
    pub elapsed: Duration,
}

pub struct DecisionEngine {
    config: EngineConfig,
    buffer: RollingBuffer,
    sequence: SequenceTracker,
    cooldown: AlertCooldown,
    metrics: FrameMetrics,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig, now: Instant) -> Self {
        Self {
            buffer: RollingBuffer::new(config.buffer_size),
            sequence: SequenceTracker::new(config.sequence_reset, now),
            cooldown: AlertCooldown::new(config.alert_cooldown),
            metrics: FrameMetrics::new(now),
            config,
        }
    }

    /// Run one update cycle for a processed frame.
    ///
    /// `now` must not go backwards between calls.
    pub fn update(&mut self, result: &DetectionFrameResult, now: Instant) -> Decision {
        let present = result.has_detection();
        self.buffer.push(present);
        self.sequence.observe(present, now);
        let fps_updated = self.metrics.record(present, now);

        Decision {
            alert: self.should_alert(now),
            buffer_ratio: self.buffer.ratio(),
            sequence_count: self.sequence.count(),
            fps_updated,
        }
    }

    /// True iff the buffer ratio meets the threshold, the sequence count is
    /// within bounds and the cooldown has passed. Never true on an empty
    /// buffer.
    pub fn should_alert(&self, now: Instant) -> bool {
        let Some(ratio) = self.buffer.ratio() else {
            return false;
        };
        ratio >= self.config.detection_threshold
            && self.sequence.count() <= self.config.max_sequences
            && self.cooldown.is_ready(now)
    }

    /// Record that the caller fired an alert at `now`.
    pub fn record_alert(&mut self, now: Instant) {
        self.cooldown.record(now);
    }

    pub fn snapshot(&self, now: Instant) -> EngineSnapshot {
        EngineSnapshot {
            buffer_len: self.buffer.len(),
            buffer_ratio: self.buffer.ratio(),
            sequence_count: self.sequence.count(),
            frame_count: self.metrics.frame_count(),
            total_detections: self.metrics.total_detections(),
            fps: self.metrics.fps(),
            detection_rate: self.metrics.detection_rate(now),
            elapsed: self.metrics.elapsed(now),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffer(&self) -> &RollingBuffer {
        &self.buffer
    }

    pub fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    pub fn cooldown(&self) -> &AlertCooldown {
        &self.cooldown
    }

    pub fn metrics(&self) -> &FrameMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn hit() -> DetectionFrameResult {
        DetectionFrameResult::from_detections(vec![Detection::new(
            BoundingBox::new(10, 10, 50, 60),
            0.8,
        )])
    }

    fn miss() -> DetectionFrameResult {
        DetectionFrameResult::empty()
    }

    fn frame(present: bool) -> DetectionFrameResult {
        if present {
            hit()
        } else {
            miss()
        }
    }

    fn config(buffer_size: usize) -> EngineConfig {
        EngineConfig {
            buffer_size,
            sequence_reset: Duration::from_secs(3600),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn full_buffer_of_detections_is_alert_eligible() {
        let t0 = Instant::now();
        let mut engine = DecisionEngine::new(config(3), t0);
        let mut last = None;
        for _ in 0..3 {
            last = Some(engine.update(&hit(), t0));
        }
        let decision = last.expect("decision");
        assert_eq!(decision.buffer_ratio, Some(1.0));
        assert!(decision.alert);
    }

    #[test]
    fn empty_engine_never_alerts() {
        let t0 = Instant::now();
        let engine = DecisionEngine::new(
            EngineConfig {
                detection_threshold: 0.0,
                ..EngineConfig::default()
            },
            t0,
        );
        assert!(!engine.should_alert(t0));
    }

    #[test]
    fn ratio_equal_to_threshold_alerts() {
        let t0 = Instant::now();
        let mut engine = DecisionEngine::new(config(10), t0);
        for present in [true, true, true, true, true, true, true, false, false, false] {
            engine.update(&frame(present), t0);
        }
        assert_eq!(engine.buffer().ratio(), Some(0.7));
        // Only one loss so far: sequence count is 1.
        assert!(engine.should_alert(t0));
    }

    #[test]
    fn ratio_below_threshold_does_not_alert() {
        let t0 = Instant::now();
        let mut engine = DecisionEngine::new(config(10), t0);
        for present in [true, true, true, true, true, true, false, false, false, false] {
            engine.update(&frame(present), t0);
        }
        assert_eq!(engine.buffer().ratio(), Some(0.6));
        assert!(!engine.should_alert(t0));
    }

    #[test]
    fn too_many_sequences_suppress_alerting() {
        let t0 = Instant::now();
        let mut engine = DecisionEngine::new(
            EngineConfig {
                buffer_size: 100,
                detection_threshold: 0.5,
                sequence_reset: Duration::from_secs(3600),
                ..EngineConfig::default()
            },
            t0,
        );

        // Three losses: still allowed.
        for _ in 0..3 {
            engine.update(&hit(), t0);
            engine.update(&hit(), t0);
            engine.update(&miss(), t0);
        }
        engine.update(&hit(), t0);
        assert_eq!(engine.sequence().count(), 3);
        assert!(engine.should_alert(t0));

        // A fourth loss crosses the limit.
        engine.update(&miss(), t0);
        engine.update(&hit(), t0);
        assert_eq!(engine.sequence().count(), 4);
        assert!(engine.buffer().ratio().unwrap_or(0.0) >= 0.5);
        assert!(!engine.should_alert(t0));
    }

    #[test]
    fn cooldown_gates_repeat_alerts() {
        let t0 = Instant::now();
        let mut engine = DecisionEngine::new(config(3), t0);
        for _ in 0..3 {
            engine.update(&hit(), t0);
        }
        assert!(engine.should_alert(t0));
        engine.record_alert(t0);

        let t5 = t0 + Duration::from_secs(5);
        assert!(!engine.update(&hit(), t5).alert);

        let t10 = t0 + Duration::from_secs(10);
        assert!(!engine.update(&hit(), t10).alert);

        let t11 = t0 + Duration::from_secs(11);
        assert!(engine.update(&hit(), t11).alert);
    }

    #[test]
    fn update_does_not_record_the_alert() {
        let t0 = Instant::now();
        let mut engine = DecisionEngine::new(config(1), t0);
        assert!(engine.update(&hit(), t0).alert);
        assert!(engine.update(&hit(), t0).alert);
        assert!(engine.cooldown().last_alert().is_none());
    }

    #[test]
    fn snapshot_reflects_counters() {
        let t0 = Instant::now();
        let mut engine = DecisionEngine::new(config(15), t0);
        engine.update(&hit(), t0);
        engine.update(&miss(), t0 + Duration::from_secs(1));
        engine.update(&hit(), t0 + Duration::from_secs(2));

        let snapshot = engine.snapshot(t0 + Duration::from_secs(4));
        assert_eq!(snapshot.buffer_len, 3);
        assert_eq!(snapshot.frame_count, 3);
        assert_eq!(snapshot.total_detections, 2);
        assert_eq!(snapshot.sequence_count, 1);
        assert_eq!(snapshot.elapsed, Duration::from_secs(4));
        assert!((snapshot.detection_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig {
            buffer_size: 0,
            ..EngineConfig::default()
        }
        .validate()
        .is_err());
        assert!(EngineConfig {
            detection_threshold: 1.5,
            ..EngineConfig::default()
        }
        .validate()
        .is_err());
    }
}
