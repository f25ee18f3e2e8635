//! Long-running decision engine scenarios on a simulated 10 fps clock.

use std::time::{Duration, Instant};

use smokewatch::detect::{BoundingBox, Detection, DetectionFrameResult};
use smokewatch::engine::{DecisionEngine, EngineConfig};

const FRAME_STEP: Duration = Duration::from_millis(100);

fn frame(present: bool) -> DetectionFrameResult {
    if present {
        DetectionFrameResult::from_detections(vec![Detection::new(
            BoundingBox::new(100, 80, 180, 200),
            0.82,
        )])
    } else {
        DetectionFrameResult::empty()
    }
}

/// Frame `i` arrives at `t0 + (i + 1) * 100ms`. Alerts are recorded the way
/// the run loop records them. Returns the indices of alerting frames.
fn drive(engine: &mut DecisionEngine, t0: Instant, pattern: &[bool]) -> Vec<usize> {
    let mut alerts = Vec::new();
    for (i, present) in pattern.iter().enumerate() {
        let now = t0 + FRAME_STEP * (i as u32 + 1);
        if engine.update(&frame(*present), now).alert {
            engine.record_alert(now);
            alerts.push(i);
        }
    }
    alerts
}

/// Three frames with smoke, one without, repeated.
fn flicker(frames: usize) -> Vec<bool> {
    (0..frames).map(|i| i % 4 != 3).collect()
}

#[test]
fn sustained_smoking_alerts_once_per_cooldown() {
    let t0 = Instant::now();
    let mut engine = DecisionEngine::new(EngineConfig::default(), t0);

    let alerts = drive(&mut engine, t0, &[true; 300]);

    // t = 0.1s, 10.2s, 20.3s
    assert_eq!(alerts, vec![0, 101, 202]);
}

#[test]
fn alert_waits_for_buffer_ratio_after_quiet_start() {
    let t0 = Instant::now();
    let mut engine = DecisionEngine::new(EngineConfig::default(), t0);

    let mut pattern = vec![false; 20];
    pattern.extend([true; 20]);
    let alerts = drive(&mut engine, t0, &pattern);

    // 11 of the last 15 frames is the first ratio at or above 0.7.
    assert_eq!(alerts.first(), Some(&30));
    assert_eq!(alerts.len(), 1);
}

#[test]
fn flickering_presence_is_suppressed_within_one_window() {
    let t0 = Instant::now();
    let mut engine = DecisionEngine::new(
        EngineConfig {
            sequence_reset: Duration::from_secs(3600),
            ..EngineConfig::default()
        },
        t0,
    );

    let alerts = drive(&mut engine, t0, &flicker(400));

    assert_eq!(alerts, vec![0]);
    let snapshot = engine.snapshot(t0 + FRAME_STEP * 400);
    assert!(snapshot.sequence_count > engine.config().max_sequences);
    assert!(snapshot.buffer_ratio.unwrap_or(0.0) >= 0.7);
}

#[test]
fn sequence_window_reset_lets_flicker_alert_again() {
    let t0 = Instant::now();
    let mut engine = DecisionEngine::new(EngineConfig::default(), t0);

    let alerts = drive(&mut engine, t0, &flicker(400));

    // Each alert lands on the first frame of a fresh sequence window once
    // the cooldown has passed: 0.1s, 10.2s, 20.4s, 30.6s.
    assert_eq!(alerts, vec![0, 101, 203, 305]);
}

#[test]
fn sparse_detections_never_alert() {
    let t0 = Instant::now();
    let mut engine = DecisionEngine::new(EngineConfig::default(), t0);

    let pattern: Vec<bool> = (0..600).map(|i| i % 2 == 0).collect();
    let alerts = drive(&mut engine, t0, &pattern[1..]);

    assert!(alerts.is_empty());
    assert_eq!(engine.snapshot(t0 + FRAME_STEP * 600).total_detections, 299);
}

#[test]
fn metrics_track_rate_and_fps() {
    let t0 = Instant::now();
    let mut engine = DecisionEngine::new(EngineConfig::default(), t0);

    drive(&mut engine, t0, &[true; 30]);

    let snapshot = engine.snapshot(t0 + FRAME_STEP * 30);
    assert_eq!(snapshot.frame_count, 30);
    assert_eq!(snapshot.total_detections, 30);
    assert_eq!(snapshot.buffer_len, 15);
    assert!((snapshot.fps - 10.0).abs() < 1e-9);
    assert!((snapshot.detection_rate - 10.0).abs() < 1e-9);
    assert_eq!(snapshot.elapsed, Duration::from_secs(3));
}
