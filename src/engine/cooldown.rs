use std::time::{Duration, Instant};

/// Minimum spacing between two fired alerts.
#[derive(Clone, Debug)]
pub struct AlertCooldown {
    cooldown: Duration,
    last_alert: Option<Instant>,
}

impl AlertCooldown {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: None,
        }
    }

    /// True when no alert has fired yet, or strictly more than the cooldown
    /// has elapsed since the last one.
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last_alert {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.cooldown,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_alert = Some(now);
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
