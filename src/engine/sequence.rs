use std::time::{Duration, Instant};

/// Counts detect→lose transitions inside a rolling time window.
///
/// A high count within one window means presence is flickering rather than
/// sustained, and the engine holds back alerts.
#[derive(Clone, Debug)]
pub struct SequenceTracker {
    count: u32,
    window_start: Instant,
    last_state: bool,
    reset_after: Duration,
}

impl SequenceTracker {
    pub fn new(reset_after: Duration, now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_state: false,
            reset_after,
        }
    }

    /// Feed the presence flag of one frame.
    ///
    /// The transition check runs against the state before any window reset,
    /// so a frame can both count a transition and then reset the window.
    pub fn observe(&mut self, present: bool, now: Instant) {
        if present != self.last_state {
            if self.last_state && !present {
                self.count = self.count.saturating_add(1);
            }
            self.last_state = present;
        }

        if now.saturating_duration_since(self.window_start) > self.reset_after {
            self.count = 0;
            self.window_start = now;
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    pub fn last_state(&self) -> bool {
        self.last_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDE: Duration = Duration::from_secs(3600);

    #[test]
    fn counts_only_true_to_false_transitions() {
        let t0 = Instant::now();
        let mut tracker = SequenceTracker::new(WIDE, t0);

        tracker.observe(false, t0);
        assert_eq!(tracker.count(), 0);
        tracker.observe(true, t0);
        assert_eq!(tracker.count(), 0);
        tracker.observe(true, t0);
        assert_eq!(tracker.count(), 0);
        tracker.observe(false, t0);
        assert_eq!(tracker.count(), 1);
        tracker.observe(false, t0);
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn alternating_presence_counts_each_loss() {
        let t0 = Instant::now();
        let mut tracker = SequenceTracker::new(WIDE, t0);
        for flag in [true, false, true, false] {
            tracker.observe(flag, t0);
        }
        assert_eq!(tracker.count(), 2);
        assert!(!tracker.last_state());
    }

    #[test]
    fn resets_only_after_window_is_exceeded() {
        let t0 = Instant::now();
        let reset = Duration::from_secs(5);
        let mut tracker = SequenceTracker::new(reset, t0);

        tracker.observe(true, t0);
        tracker.observe(false, t0 + Duration::from_secs(1));
        assert_eq!(tracker.count(), 1);

        // Exactly at the window edge nothing resets.
        tracker.observe(false, t0 + reset);
        assert_eq!(tracker.count(), 1);
        assert_eq!(tracker.window_start(), t0);

        let later = t0 + reset + Duration::from_millis(1);
        tracker.observe(false, later);
        assert_eq!(tracker.count(), 0);
        assert_eq!(tracker.window_start(), later);
    }

    #[test]
    fn transition_and_reset_in_same_frame() {
        let t0 = Instant::now();
        let reset = Duration::from_secs(5);
        let mut tracker = SequenceTracker::new(reset, t0);

        tracker.observe(true, t0);
        let late = t0 + Duration::from_secs(6);
        tracker.observe(false, late);

        // The loss is counted first, then the expired window wipes it.
        assert_eq!(tracker.count(), 0);
        assert_eq!(tracker.window_start(), late);
        assert!(!tracker.last_state());
    }
}
