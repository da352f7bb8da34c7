//! Scene Pilot - scene-graph driven automation core for Android games
//!
//! An automation script describes the target app as a graph of scenes.
//! Each scene is recognized by visual anchors (template images, colors,
//! text, remote classification) and offers regions: prioritized,
//! scheduled actions that may lead to other scenes. The engine runs a
//! finite-state machine over that graph, predicting transitions after each
//! action and recovering when it loses track of the screen.
//!
//! ## Anti-Detection
//!
//! The `stealth` module provides humanization features to make automation
//! less detectable by adding realistic variance to timing and positions.

pub mod action;
pub mod android;
pub mod config;
pub mod engine;
pub mod graph;
pub mod host;
pub mod stealth;
pub mod telemetry;
pub mod vision;

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

pub use engine::{EngineError, EngineSnapshot, EngineStatus, SceneGraphEngine, StartOutcome};
pub use graph::ScriptGraph;

/// Global engine instance for JNI access
static ENGINE: Lazy<Mutex<Option<Arc<SceneGraphEngine>>>> = Lazy::new(|| Mutex::new(None));

/// Install the global engine. Refused while the current one is running.
pub fn install_engine(engine: SceneGraphEngine) -> bool {
    let Ok(mut slot) = ENGINE.lock() else {
        return false;
    };
    if slot.as_ref().is_some_and(|current| current.is_running()) {
        log::warn!("Engine is running, keeping the current instance");
        return false;
    }
    *slot = Some(Arc::new(engine));
    true
}

/// Get the global engine
pub fn current_engine() -> Option<Arc<SceneGraphEngine>> {
    ENGINE.lock().ok().and_then(|slot| slot.clone())
}
