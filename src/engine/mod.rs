//! Scene graph engine
//!
//! Owns the lifecycle of a script run: single-flight start, cooperative
//! stop and a dedicated worker thread driving the [`FsmRunner`].

pub mod runner;
pub mod selector;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use runner::{FsmRunner, Recovery, RunSnapshot, Tick};
pub use selector::{Ineligible, ScheduleClock};

use crate::config::EngineSettings;
use crate::graph::{ScriptError, ScriptGraph};
use crate::host::Collaborators;

/// Poll period for lifecycle waits
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Previous run did not stop in time")]
    WorkerStillRunning,

    #[error("Failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Unknown scene: {0}")]
    UnknownScene(String),

    #[error("Engine state lock poisoned")]
    Poisoned,
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Result of [`SceneGraphEngine::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run is in progress; the request was ignored
    AlreadyRunning,
}

/// Status plus the latest published run state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunSnapshot>,
}

struct Shared {
    status: Mutex<EngineStatus>,
    snapshot: Arc<Mutex<Option<RunSnapshot>>>,
}

impl Shared {
    fn status(&self) -> EngineStatus {
        self.status.lock().map(|s| *s).unwrap_or_default()
    }

    fn set_status(&self, status: EngineStatus) {
        if let Ok(mut s) = self.status.lock() {
            *s = status;
        }
    }
}

/// Marks the engine idle when the worker exits, however it exits
struct IdleOnExit(Arc<Shared>);

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        self.0.set_status(EngineStatus::Idle);
    }
}

#[derive(Default)]
struct Control {
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

/// Public entry point driving script runs
pub struct SceneGraphEngine {
    collaborators: Collaborators,
    settings: EngineSettings,
    control: Mutex<Control>,
    shared: Arc<Shared>,
}

impl SceneGraphEngine {
    /// Create an idle engine
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        Self {
            collaborators,
            settings,
            control: Mutex::new(Control::default()),
            shared: Arc::new(Shared {
                status: Mutex::new(EngineStatus::Idle),
                snapshot: Arc::new(Mutex::new(None)),
            }),
        }
    }

    /// Engine settings
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Parse `script` and start running it.
    ///
    /// A start while a run is in progress is a no-op. A script that fails to
    /// load is reported to the user and leaves the engine idle.
    pub fn start(&self, script: &str) -> Result<StartOutcome, EngineError> {
        let mut control = self.control.lock().map_err(|_| EngineError::Poisoned)?;

        if self.shared.status() == EngineStatus::Running {
            log::warn!("Engine already running, start ignored");
            return Ok(StartOutcome::AlreadyRunning);
        }

        if let Some(worker) = control.worker.take() {
            let timeout = Duration::from_millis(self.settings.timings.worker_join_ms);
            if !wait_finished(&worker, timeout) {
                log::error!("Previous engine thread still running after {:?}", timeout);
                control.worker = Some(worker);
                return Err(EngineError::WorkerStillRunning);
            }
            if worker.join().is_err() {
                log::warn!("Previous engine thread panicked");
            }
        }

        let graph = match ScriptGraph::from_json(script) {
            Ok(graph) => Arc::new(graph),
            Err(e) => {
                log::error!("Failed to load script: {}", e);
                self.collaborators
                    .notifier
                    .notify(&format!("Script failed to load: {}", e));
                self.shared.set_status(EngineStatus::Idle);
                return Err(e.into());
            }
        };
        log::info!(
            "Loaded script with {} scenes, root '{}'",
            graph.nodes().len(),
            graph.root().id
        );

        let stop = Arc::new(AtomicBool::new(false));
        let mut runner = FsmRunner::new(
            graph,
            self.settings.clone(),
            self.collaborators.clone(),
            Arc::clone(&stop),
        )
        .with_snapshot_sink(Arc::clone(&self.shared.snapshot));

        self.shared.set_status(EngineStatus::Running);
        let guard = IdleOnExit(Arc::clone(&self.shared));
        let spawned = std::thread::Builder::new()
            .name("scene-graph-fsm".to_string())
            .spawn(move || {
                let _idle = guard;
                runner.run();
            });

        match spawned {
            Ok(worker) => {
                control.worker = Some(worker);
                control.stop = stop;
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                log::error!("Failed to spawn engine thread: {}", e);
                self.shared.set_status(EngineStatus::Idle);
                Err(EngineError::Spawn(e))
            }
        }
    }

    /// Request a cooperative stop. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let Ok(control) = self.control.lock() else {
            return false;
        };
        if self.shared.status() != EngineStatus::Running {
            return false;
        }
        log::info!("Stopping engine");
        self.shared.set_status(EngineStatus::Stopping);
        control.stop.store(true, Ordering::SeqCst);
        true
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.shared.status() == EngineStatus::Running
    }

    /// Lifecycle status
    pub fn status(&self) -> EngineStatus {
        self.shared.status()
    }

    /// Status plus the latest run state
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            status: self.shared.status(),
            run: self.shared.snapshot.lock().ok().and_then(|s| s.clone()),
        }
    }

    /// Block until the engine is idle or `timeout` elapses
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.status() == EngineStatus::Idle {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for SceneGraphEngine {
    fn drop(&mut self) {
        if let Ok(control) = self.control.lock() {
            control.stop.store(true, Ordering::SeqCst);
        }
    }
}

fn wait_finished(worker: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !worker.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    true
}
