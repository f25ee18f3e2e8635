use std::time::{Duration, Instant};

/// Frames between two fps recomputations.
pub const FPS_WINDOW_FRAMES: u64 = 30;

/// Cumulative per-stream counters.
#[derive(Clone, Debug)]
pub struct FrameMetrics {
    frame_count: u64,
    total_detections: u64,
    started_at: Instant,
    fps: f64,
    fps_window_start: Instant,
}

impl FrameMetrics {
    pub fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            total_detections: 0,
            started_at: now,
            fps: 0.0,
            fps_window_start: now,
        }
    }

    /// Count one processed frame. Returns true when fps was recomputed.
    pub fn record(&mut self, has_detection: bool, now: Instant) -> bool {
        self.frame_count += 1;
        if has_detection {
            self.total_detections += 1;
        }

        if self.frame_count % FPS_WINDOW_FRAMES != 0 {
            return false;
        }
        let elapsed = now
            .saturating_duration_since(self.fps_window_start)
            .as_secs_f64();
        // A zero-length window keeps the previous rate.
        if elapsed > 0.0 {
            self.fps = FPS_WINDOW_FRAMES as f64 / elapsed;
        }
        self.fps_window_start = now;
        true
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn total_detections(&self) -> u64 {
        self.total_detections
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// Detections per second since start; 0 when no time has elapsed.
    pub fn detection_rate(&self, now: Instant) -> f64 {
        let elapsed = self.elapsed(now).as_secs_f64();
        if elapsed > 0.0 {
            self.total_detections as f64 / elapsed
        } else {
            0.0
        }
    }
}
