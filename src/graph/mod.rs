//! Scene graph module
//!
//! The automation script (scenes, anchors, regions), the per-run execution
//! history and the FSM runtime state.

pub mod geometry;
pub mod history;
pub mod model;
pub mod state;

pub use geometry::{PixelRect, Projection, Rect, Resolution};
pub use history::{ExecutionHistory, RegionRecord};
pub use model::{
    ActionConfig, ActionParams, ActionType, Anchor, ColorSampling, Condition, HexColor,
    MatchType, Region, SceneNode, Schedule, ScheduleMode, ScriptError, ScriptGraph,
    ScriptMetadata, SideEffect, SideEffectKind, SwipeDirection, TimeOfDay,
};
pub use state::{EngineRuntimeState, TransitionAction};

/// Engine variable map
pub type Variables = std::collections::HashMap<String, i64>;
