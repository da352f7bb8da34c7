//! Engine settings
//!
//! Every tunable constant of the engine: loop pacing, transition and
//! recovery thresholds, perception tolerances and stealth behavior.

use serde::{Deserialize, Serialize};

use crate::stealth::StealthConfig;

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Loop pacing
    pub timings: TimingSettings,
    /// Predictive transition and recovery thresholds
    pub transition: TransitionSettings,
    /// Perception tolerances
    pub vision: VisionSettings,
    /// Humanization
    pub stealth: StealthConfig,
}

impl EngineSettings {
    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Create settings tuned for snappy, animation-light games
    pub fn fast_preset() -> Self {
        Self {
            timings: TimingSettings {
                warmup_ms: 500,
                loop_interval_ms: 300,
                idle_sleep_ms: 600,
                transition_check_ms: 300,
                ..Default::default()
            },
            transition: TransitionSettings {
                grace_period_ms: 2000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create settings for slow devices and long loading screens
    pub fn cautious_preset() -> Self {
        Self {
            timings: TimingSettings {
                warmup_ms: 2000,
                loop_interval_ms: 800,
                idle_sleep_ms: 1500,
                ..Default::default()
            },
            transition: TransitionSettings {
                grace_period_ms: 5000,
                stuck_give_up_checks: 30,
                lost_frame_limit: 30,
                ..Default::default()
            },
            stealth: StealthConfig::maximum(),
            ..Default::default()
        }
    }
}

/// Timing settings for the run loop (ms)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Delay before the first iteration
    pub warmup_ms: u64,
    /// Pause after an iteration that acted
    pub loop_interval_ms: u64,
    /// Pause when no region is eligible
    pub idle_sleep_ms: u64,
    /// Spacing of checks while a predicted transition is pending
    pub transition_check_ms: u64,
    /// Pause after a failed capture
    pub capture_retry_ms: u64,
    /// Pause after a faulted iteration
    pub error_backoff_ms: u64,
    /// Pause after relaunching the target app
    pub relaunch_backoff_ms: u64,
    /// Granularity of interruptible sleeps
    pub sleep_chunk_ms: u64,
    /// Bounded wait for a previous worker before a new start
    pub worker_join_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            warmup_ms: 1000,
            loop_interval_ms: 500,
            idle_sleep_ms: 1000,
            transition_check_ms: 500,
            capture_retry_ms: 1000,
            error_backoff_ms: 1000,
            relaunch_backoff_ms: 2000,
            sleep_chunk_ms: 200,
            worker_join_ms: 1000,
        }
    }
}

/// Predictive transition and recovery thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionSettings {
    /// Window after a predicted transition during which the target is trusted
    pub grace_period_ms: u64,
    /// Retry the triggering action every N stuck checks
    pub stuck_retry_every: u32,
    /// Abandon the wait after this many stuck checks
    pub stuck_give_up_checks: u32,
    /// Reset to root after this many iterations without an identified scene
    pub lost_frame_limit: u32,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 3000,
            stuck_retry_every: 6,
            stuck_give_up_checks: 20,
            lost_frame_limit: 20,
        }
    }
}

/// Perception tolerances
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Minimum template match score
    pub image_threshold: f32,
    /// Matches at or above this score skip the position check
    pub high_score_pardon: f32,
    /// Allowed drift from the authored position, as a fraction of the screen
    pub position_tolerance: f32,
    /// Maximum RGB distance for color anchors
    pub color_tolerance: f32,
    /// OCR call bound
    pub ocr_timeout_ms: u64,
    /// Remote perception call bound
    pub remote_timeout_ms: u64,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            image_threshold: 0.8,
            high_score_pardon: 0.9,
            position_tolerance: 0.25,
            color_tolerance: 40.0,
            ocr_timeout_ms: 3000,
            remote_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.transition.grace_period_ms, 3000);
        assert_eq!(settings.transition.stuck_retry_every, 6);
        assert_eq!(settings.transition.stuck_give_up_checks, 20);
        assert_eq!(settings.timings.sleep_chunk_ms, 200);
        assert!((settings.vision.high_score_pardon - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_json() {
        let settings =
            EngineSettings::from_json(r#"{ "transition": { "grace_period_ms": 1500 } }"#).unwrap();
        assert_eq!(settings.transition.grace_period_ms, 1500);
        assert_eq!(settings.transition.lost_frame_limit, 20);
        assert_eq!(settings.timings.loop_interval_ms, 500);
    }

    #[test]
    fn test_presets() {
        let fast = EngineSettings::fast_preset();
        assert!(fast.timings.loop_interval_ms < TimingSettings::default().loop_interval_ms);

        let cautious = EngineSettings::cautious_preset();
        assert!(cautious.transition.grace_period_ms > 3000);
        assert_eq!(cautious.stealth.wait_variance_percent, 35);
    }
}
