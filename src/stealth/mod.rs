//! Stealth and anti-detection module
//!
//! This module provides the pieces that make automation look human:
//! - Gaussian jitter for tap positions and delays
//! - Randomized tap durations and curved swipe parameters
//! - Interruptible, jittered pacing driven by an injectable clock

pub mod humanize;
pub mod pacing;

pub use humanize::*;
pub use pacing::{Clock, ManualClock, Pacer, SystemClock};

use serde::{Deserialize, Serialize};

/// Configuration for stealth behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthConfig {
    /// Enable jittered delays
    pub humanize_timing: bool,
    /// Enable Gaussian tap positions
    pub humanize_position: bool,
    /// Variance applied to script waits, as a percentage of the wait
    pub wait_variance_percent: u32,
    /// Tap hold duration range (ms)
    pub click_duration_ms: (u64, u64),
    /// Default delay between repeated taps (ms)
    pub repeat_delay_ms: u64,
    /// Maximum finger drift between repeated taps (px)
    pub repeat_perturbation_px: f32,
    /// Default long press hold (ms)
    pub long_press_ms: u64,
    /// Swipe travel distance range (px)
    pub swipe_distance_px: (f32, f32),
    /// Default swipe duration (ms)
    pub swipe_duration_ms: u64,
    /// Control point bend as a fraction of travel distance
    pub swipe_bend: (f32, f32),
    /// Split swipes into ease-in / cruise / ease-out strokes
    pub segmented_swipe: bool,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            humanize_timing: true,
            humanize_position: true,
            wait_variance_percent: 20,
            click_duration_ms: (100, 200),
            repeat_delay_ms: 100,
            repeat_perturbation_px: 2.5,
            long_press_ms: 1000,
            swipe_distance_px: (300.0, 400.0),
            swipe_duration_ms: 500,
            swipe_bend: (0.1, 0.3),
            segmented_swipe: true,
        }
    }
}

impl StealthConfig {
    /// Create a config with no stealth (for testing)
    pub fn disabled() -> Self {
        Self {
            humanize_timing: false,
            humanize_position: false,
            wait_variance_percent: 0,
            repeat_perturbation_px: 0.0,
            swipe_bend: (0.0, 0.0),
            segmented_swipe: false,
            ..Self::default()
        }
    }

    /// Create a highly stealthy config
    pub fn maximum() -> Self {
        Self {
            wait_variance_percent: 35,
            click_duration_ms: (90, 260),
            repeat_delay_ms: 160,
            repeat_perturbation_px: 3.5,
            swipe_duration_ms: 650,
            swipe_bend: (0.15, 0.3),
            ..Self::default()
        }
    }

    /// Variance (ms) applied to a script-defined wait
    pub fn wait_variance(&self, base_ms: u64) -> u64 {
        if !self.humanize_timing {
            return 0;
        }
        base_ms * self.wait_variance_percent as u64 / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_variance() {
        let config = StealthConfig::default();
        assert_eq!(config.wait_variance(1000), 200);
        assert_eq!(StealthConfig::disabled().wait_variance(1000), 0);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let json = serde_json::to_string(&StealthConfig::maximum()).unwrap();
        let parsed: StealthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.wait_variance_percent, 35);

        // Missing fields fall back to defaults
        let partial: StealthConfig = serde_json::from_str(r#"{ "long_press_ms": 1500 }"#).unwrap();
        assert_eq!(partial.long_press_ms, 1500);
        assert!(partial.segmented_swipe);
    }
}
