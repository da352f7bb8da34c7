//! Configuration module
//!
//! Handles engine tuning: pacing, transition thresholds, perception
//! tolerances and humanization.

pub mod settings;

pub use settings::{EngineSettings, TimingSettings, TransitionSettings, VisionSettings};
