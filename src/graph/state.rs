//! Engine runtime state
//!
//! Tracks where the FSM believes it is, the live variable map, and the
//! bookkeeping for predicted transitions and lost-localization recovery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::model::{ScriptGraph, SideEffect, SideEffectKind};

/// Region whose action triggered the pending transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionAction {
    pub scene_id: String,
    pub region_id: String,
}

/// Mutable FSM state owned by the worker for the duration of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRuntimeState {
    /// Scene the engine believes is on screen
    pub current_scene_id: String,
    /// Scene before the last transition
    pub previous_scene_id: Option<String>,
    /// Live variables (seeded from the script)
    pub variables: HashMap<String, i64>,
    /// Clock time of the last predicted transition (ms)
    pub last_transition_time: Option<u64>,
    /// Whether a predicted transition still awaits confirmation
    pub transition_pending: bool,
    /// Checks spent waiting on the pending transition
    pub transition_stuck_count: u32,
    /// Consecutive iterations without an identified scene
    pub lost_frame_count: u32,
    /// Action that triggered the pending transition
    pub last_transition_action: Option<TransitionAction>,
    /// Iterations spent in the current scene
    pub frames_in_scene: u32,
}

impl EngineRuntimeState {
    /// Fresh state positioned at the graph's root
    pub fn new(graph: &ScriptGraph) -> Self {
        Self {
            current_scene_id: graph.root().id.clone(),
            previous_scene_id: None,
            variables: graph.variables().clone(),
            last_transition_time: None,
            transition_pending: false,
            transition_stuck_count: 0,
            lost_frame_count: 0,
            last_transition_action: None,
            frames_in_scene: 0,
        }
    }

    /// Record an observed scene. Returns true if it differs from the current one.
    pub fn enter_scene(&mut self, scene_id: &str) -> bool {
        self.lost_frame_count = 0;
        if scene_id == self.current_scene_id {
            self.frames_in_scene = self.frames_in_scene.saturating_add(1);
            return false;
        }
        self.previous_scene_id = Some(std::mem::replace(
            &mut self.current_scene_id,
            scene_id.to_string(),
        ));
        self.frames_in_scene = 0;
        true
    }

    /// Optimistically move to `target` before re-observing the screen
    pub fn predict_transition(&mut self, target: &str, now_ms: u64, action: TransitionAction) {
        self.previous_scene_id = Some(std::mem::replace(
            &mut self.current_scene_id,
            target.to_string(),
        ));
        self.last_transition_time = Some(now_ms);
        self.transition_pending = true;
        self.transition_stuck_count = 0;
        self.last_transition_action = Some(action);
        self.frames_in_scene = 0;
    }

    /// The predicted scene was observed
    pub fn confirm_transition(&mut self) {
        self.transition_pending = false;
        self.transition_stuck_count = 0;
    }

    /// Stop waiting on the predicted scene and fall back to identification
    pub fn release_transition(&mut self) {
        self.transition_pending = false;
        self.transition_stuck_count = 0;
    }

    /// Whether `now_ms` is within `grace_ms` of the last predicted transition
    pub fn in_grace_period(&self, now_ms: u64, grace_ms: u64) -> bool {
        self.last_transition_time
            .is_some_and(|t| now_ms.saturating_sub(t) < grace_ms)
    }

    /// Force the FSM back to a known scene (recovery paths)
    pub fn reset_to(&mut self, scene_id: &str) {
        if self.current_scene_id != scene_id {
            self.previous_scene_id = Some(std::mem::replace(
                &mut self.current_scene_id,
                scene_id.to_string(),
            ));
        }
        self.transition_pending = false;
        self.transition_stuck_count = 0;
        self.lost_frame_count = 0;
        self.frames_in_scene = 0;
    }

    /// Current value of a variable (0 if unset)
    pub fn variable(&self, name: &str) -> i64 {
        self.variables.get(name).copied().unwrap_or(0)
    }

    /// Runtime `enable_<label>` override, if the variable exists
    pub fn enable_override(&self, variable: &str) -> Option<bool> {
        self.variables.get(variable).map(|&v| v > 0)
    }

    /// Apply a region's side effect
    pub fn apply_side_effect(&mut self, effect: &SideEffect) {
        let value = self.variables.entry(effect.variable.clone()).or_insert(0);
        *value = match effect.kind {
            SideEffectKind::Decrement => value.saturating_sub(effect.value.unwrap_or(1)).max(0),
            SideEffectKind::Increment => value.saturating_add(effect.value.unwrap_or(1)),
            SideEffectKind::Set => effect.value.unwrap_or(0),
        };
        log::debug!("Variable '{}' is now {}", effect.variable, value);
    }
}
