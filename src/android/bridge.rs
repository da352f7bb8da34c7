//! JNI function exports for Android integration
//!
//! These functions are called from Kotlin via JNI to drive the scene graph
//! engine.

use std::sync::Arc;

use jni::objects::{JClass, JObject, JString};
use jni::sys::{jboolean, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;

use super::host::JniHost;
use crate::config::EngineSettings;
use crate::engine::{SceneGraphEngine, StartOutcome};
use crate::host::Collaborators;
use crate::telemetry::{TelemetryOptions, TelemetryQueue};
use crate::{current_engine, install_engine};

fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

fn read_string(env: &mut JNIEnv, value: &JString) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match env.get_string(value) {
        Ok(s) => Some(s.into()),
        Err(e) => {
            log::error!("Failed to read Java string: {}", e);
            None
        }
    }
}

/// Create the engine around the Kotlin host object
///
/// Called once when the accessibility service connects. Fails while a run
/// is in progress.
#[no_mangle]
pub extern "system" fn Java_io_scenepilot_PilotCore_init<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    host: JObject<'local>,
    settings_json: JString<'local>,
) -> jboolean {
    // Initialize Android logger
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("ScenePilot"),
    );

    log::info!("Initializing scene graph engine");

    let settings = match read_string(&mut env, &settings_json) {
        Some(json) => EngineSettings::from_json(&json).unwrap_or_else(|e| {
            log::error!("Invalid settings, using defaults: {}", e);
            EngineSettings::default()
        }),
        None => EngineSettings::default(),
    };

    let host = match JniHost::new(&mut env, &host) {
        Ok(host) => Arc::new(host),
        Err(e) => {
            log::error!("Failed to bind host object: {}", e);
            return JNI_FALSE;
        }
    };

    let mut collaborators = Collaborators::new(host.clone(), host.clone())
        .with_focus(host.clone())
        .with_notifier(host.clone())
        .with_ocr(host.clone())
        .with_remote(host.clone());
    match TelemetryQueue::spawn(host, TelemetryOptions::default()) {
        // The flusher exits once the last queue handle is dropped
        Ok((queue, _flusher)) => collaborators = collaborators.with_telemetry(queue),
        Err(e) => log::warn!("Telemetry disabled: {}", e),
    }

    let installed = install_engine(SceneGraphEngine::new(collaborators, settings));
    if installed {
        log::info!("Scene graph engine initialized");
    }
    to_jboolean(installed)
}

/// Start running a script (JSON). Returns true if a new run started.
#[no_mangle]
pub extern "system" fn Java_io_scenepilot_PilotCore_start<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    script_json: JString<'local>,
) -> jboolean {
    let Some(engine) = current_engine() else {
        log::error!("Engine not initialized");
        return JNI_FALSE;
    };
    let Some(script) = read_string(&mut env, &script_json) else {
        log::error!("No script given");
        return JNI_FALSE;
    };

    match engine.start(&script) {
        Ok(StartOutcome::Started) => JNI_TRUE,
        Ok(StartOutcome::AlreadyRunning) => JNI_FALSE,
        Err(e) => {
            log::error!("Failed to start: {}", e);
            JNI_FALSE
        }
    }
}

/// Request a cooperative stop
#[no_mangle]
pub extern "system" fn Java_io_scenepilot_PilotCore_stop<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jboolean {
    to_jboolean(current_engine().is_some_and(|engine| engine.stop()))
}

/// Whether a run is in progress
#[no_mangle]
pub extern "system" fn Java_io_scenepilot_PilotCore_isRunning<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jboolean {
    to_jboolean(current_engine().is_some_and(|engine| engine.is_running()))
}

/// Get the engine state as JSON
#[no_mangle]
pub extern "system" fn Java_io_scenepilot_PilotCore_getState<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jstring {
    let state_json = current_engine()
        .and_then(|engine| serde_json::to_string(&engine.snapshot()).ok())
        .unwrap_or_else(|| "{}".to_string());

    match env.new_string(state_json) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            log::error!("Failed to create state string: {}", e);
            std::ptr::null_mut()
        }
    }
}
