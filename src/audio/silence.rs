//! Voice-activity timer.
//!
//! Re-arm on rise: every analysis tick at or above the threshold moves the
//! clock forward; a separate fixed-interval check asks whether the clock has
//! gone stale.  The clock starts armed, so a recording where nobody speaks
//! still ends after one window.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::AudioConfig;

#[derive(Debug, Clone)]
pub struct SilenceClock {
    threshold: f32,
    window: Duration,
    last_voice: Instant,
}

impl SilenceClock {
    pub fn new(threshold: f32, window: Duration, now: Instant) -> Self {
        Self {
            threshold,
            window,
            last_voice: now,
        }
    }

    pub fn from_config(config: &AudioConfig, now: Instant) -> Self {
        Self::new(
            config.silence_threshold,
            Duration::from_millis(config.silence_duration_ms),
            now,
        )
    }

    /// Record one volume sample.
    pub fn observe(&mut self, level: f32, now: Instant) {
        if level >= self.threshold {
            self.last_voice = now;
        }
    }

    /// `true` once the quiet stretch is strictly longer than the window.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_voice) > self.window
    }

    pub fn last_voice(&self) -> Instant {
        self.last_voice
    }
}
