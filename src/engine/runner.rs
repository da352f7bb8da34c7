//! The FSM run loop
//!
//! One [`FsmRunner`] owns all mutable state of a run (runtime state,
//! execution history, perception caches) and is driven by a single worker
//! thread. [`FsmRunner::step`] performs one iteration without the trailing
//! pause so it can be exercised directly with a simulated clock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::selector::{self, ScheduleClock};
use super::EngineError;
use crate::action::{ActionSystem, DEFAULT_WAIT_MS};
use crate::config::EngineSettings;
use crate::graph::{
    ActionType, EngineRuntimeState, ExecutionHistory, Region, SceneNode, ScriptGraph, TransitionAction, Variables,
};
use crate::host::{self, Collaborators};
use crate::stealth::{Humanizer, Pacer};
use crate::telemetry::EngineEvent;
use crate::vision::{Frame, PerceptionSystem};

/// Why the FSM was forced back to the root scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// The current global scene disappeared and nothing else matched
    GlobalExit,
    /// No scene identified for too many iterations
    Lost,
}

/// Outcome of one iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// The target app lost focus and was relaunched
    Relaunched,
    /// No screenshot this time
    CaptureFailed,
    /// Waiting on a predicted transition
    TransitionWait { checks: u32 },
    /// Waiting on a predicted transition; the triggering action was retried
    TransitionRetry { checks: u32 },
    /// A region was performed
    Acted { scene: String, region: String },
    /// The scene was identified but no region is eligible
    NoEligible { scene: String },
    /// Nothing identified this iteration
    Lost { frames: u32 },
    /// Reset to root
    Recovered(Recovery),
}

/// Read-only view of a run, published after every iteration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub script: Option<String>,
    pub current_scene_id: String,
    pub previous_scene_id: Option<String>,
    pub variables: Variables,
    pub history: ExecutionHistory,
    pub transition_pending: bool,
    pub transition_stuck_count: u32,
    pub lost_frame_count: u32,
    pub iterations: u64,
}

/// Transition-window verdict
enum Window {
    /// Target observed
    Confirmed,
    /// Stop waiting and identify normally
    Released,
    /// Keep waiting
    Waiting(Tick),
}

/// Identification verdict
enum Identified {
    Scene(String),
    Recovered(Recovery),
    Lost(u32),
}

/// Per-run FSM state and logic
pub struct FsmRunner {
    graph: Arc<ScriptGraph>,
    settings: EngineSettings,
    state: EngineRuntimeState,
    history: ExecutionHistory,
    perception: PerceptionSystem,
    actions: ActionSystem,
    humanizer: Humanizer,
    pacer: Pacer,
    collaborators: Collaborators,
    origin_app: Option<String>,
    snapshot_sink: Option<Arc<Mutex<Option<RunSnapshot>>>>,
    iterations: u64,
}

impl FsmRunner {
    /// Create a runner positioned at the graph's root
    pub fn new(
        graph: Arc<ScriptGraph>,
        settings: EngineSettings,
        collaborators: Collaborators,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let pacer = Pacer::new(collaborators.clock.clone(), stop, settings.timings.sleep_chunk_ms);

        let mut perception = PerceptionSystem::new(settings.vision.clone());
        if let Some(ocr) = &collaborators.ocr {
            perception = perception.with_text_recognizer(Arc::clone(ocr));
        }
        if let Some(remote) = &collaborators.remote {
            perception = perception.with_remote_classifier(Arc::clone(remote));
        }

        let actions = ActionSystem::new(
            Arc::clone(&collaborators.gestures),
            settings.stealth.clone(),
            pacer.clone(),
        );
        let origin_app = host::origin_app(
            collaborators.focus.as_ref(),
            graph.metadata().package_name.as_deref(),
        );

        Self {
            state: EngineRuntimeState::new(&graph),
            history: ExecutionHistory::new(),
            graph,
            settings,
            perception,
            actions,
            humanizer: Humanizer::new(),
            pacer,
            collaborators,
            origin_app,
            snapshot_sink: None,
            iterations: 0,
        }
    }

    /// Deterministic randomness (tests, simulations)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.humanizer = Humanizer::with_seed(seed);
        self.actions = self.actions.with_humanizer(Humanizer::with_seed(seed.wrapping_add(1)));
        self
    }

    /// Publish a snapshot into `sink` after every iteration
    pub fn with_snapshot_sink(mut self, sink: Arc<Mutex<Option<RunSnapshot>>>) -> Self {
        self.snapshot_sink = Some(sink);
        self
    }

    /// Runtime state
    pub fn state(&self) -> &EngineRuntimeState {
        &self.state
    }

    /// Execution history
    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Iterations performed so far
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run until stopped
    pub fn run(&mut self) {
        log::info!(
            "Scene graph engine running '{}' from scene '{}'",
            self.script_name().unwrap_or("unnamed script"),
            self.state.current_scene_id
        );
        self.emit(EngineEvent::Started {
            script: self.script_name().map(str::to_string),
        });
        self.publish();

        if self.pacer.sleep(self.settings.timings.warmup_ms) {
            while !self.pacer.is_stopped() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.step()));
                let pause = match outcome {
                    Ok(Ok(tick)) => {
                        log::trace!("Iteration {}: {:?}", self.iterations, tick);
                        self.pause_for(&tick)
                    }
                    Ok(Err(e)) => {
                        log::error!("Iteration {} failed: {}", self.iterations, e);
                        self.settings.timings.error_backoff_ms
                    }
                    Err(payload) => {
                        log::error!(
                            "Iteration {} panicked: {}",
                            self.iterations,
                            panic_message(payload.as_ref())
                        );
                        self.settings.timings.error_backoff_ms
                    }
                };
                self.publish();
                self.wait(pause);
            }
        }

        self.shutdown();
    }

    /// One FSM iteration
    pub fn step(&mut self) -> Result<Tick, EngineError> {
        self.iterations += 1;

        if let Some(tick) = self.guard_focus() {
            return Ok(tick);
        }

        let Some(screen) = self.collaborators.capture.capture_screen() else {
            log::warn!("Screen capture failed, retrying");
            return Ok(Tick::CaptureFailed);
        };
        let screen = Frame::new(screen);
        let now = self.pacer.now_ms();

        let mut confirmed = false;
        if self.state.transition_pending {
            match self.check_transition(&screen)? {
                Window::Waiting(tick) => return Ok(tick),
                Window::Confirmed => confirmed = true,
                Window::Released => {}
            }
        }

        let scene_id = match self.identify(&screen, now, confirmed)? {
            Identified::Scene(id) => id,
            Identified::Recovered(recovery) => return Ok(Tick::Recovered(recovery)),
            Identified::Lost(frames) => return Ok(Tick::Lost { frames }),
        };
        let previous = self.state.current_scene_id.clone();
        if self.state.enter_scene(&scene_id) {
            log::info!("Scene '{}' -> '{}'", previous, scene_id);
            self.emit(EngineEvent::SceneChanged {
                from: previous,
                to: scene_id.clone(),
            });
        }

        let graph = Arc::clone(&self.graph);
        let scene = graph
            .node(&scene_id)
            .ok_or_else(|| EngineError::UnknownScene(scene_id.clone()))?;

        let Some(region) = self.select_region(&screen, scene, now) else {
            log::debug!("No eligible region in scene '{}'", scene.name());
            return Ok(Tick::NoEligible { scene: scene_id });
        };

        if !self.act(scene, region, screen.dimensions()) {
            // Interrupted by stop
            return Ok(Tick::NoEligible { scene: scene_id });
        }

        if let Some(target) = region.target.as_deref().filter(|t| *t != scene.id) {
            log::info!(
                "Predicting transition '{}' -> '{}' via region '{}'",
                scene.id,
                target,
                region.id
            );
            self.state.predict_transition(
                target,
                self.pacer.now_ms(),
                TransitionAction {
                    scene_id: scene.id.clone(),
                    region_id: region.id.clone(),
                },
            );
        }

        self.emit(EngineEvent::Acted {
            scene: scene.id.clone(),
            region: region.id.clone(),
        });
        Ok(Tick::Acted {
            scene: scene.id.clone(),
            region: region.id.clone(),
        })
    }

    /// Release per-run resources
    pub fn shutdown(&mut self) {
        self.perception.clear_cache();
        self.history.clear();
        self.publish();
        self.emit(EngineEvent::Stopped {
            iterations: self.iterations,
        });
        log::info!("Scene graph engine stopped after {} iterations", self.iterations);
    }

    /// Snapshot of the run
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            script: self.script_name().map(str::to_string),
            current_scene_id: self.state.current_scene_id.clone(),
            previous_scene_id: self.state.previous_scene_id.clone(),
            variables: self.state.variables.clone(),
            history: self.history.clone(),
            transition_pending: self.state.transition_pending,
            transition_stuck_count: self.state.transition_stuck_count,
            lost_frame_count: self.state.lost_frame_count,
            iterations: self.iterations,
        }
    }

    /// Relaunch the origin app when something else has focus
    fn guard_focus(&mut self) -> Option<Tick> {
        let origin = self.origin_app.as_deref()?;
        let foreground = host::focus_drift(self.collaborators.focus.as_ref(), Some(origin))?;

        log::warn!("Foreground app is '{}', not '{}'; relaunching", foreground, origin);
        if let Err(e) = self.collaborators.focus.launch_app(origin) {
            log::error!("Failed to relaunch '{}': {}", origin, e);
        }
        self.emit(EngineEvent::FocusDrift {
            foreground,
            origin: origin.to_string(),
        });
        Some(Tick::Relaunched)
    }

    fn check_transition(&mut self, screen: &Frame) -> Result<Window, EngineError> {
        let graph = Arc::clone(&self.graph);
        let target_id = self.state.current_scene_id.clone();
        let target = graph
            .node(&target_id)
            .ok_or_else(|| EngineError::UnknownScene(target_id.clone()))?;

        if target.is_blind() || self.is_active(screen, target) {
            log::debug!("Transition to '{}' confirmed", target_id);
            self.state.confirm_transition();
            return Ok(Window::Confirmed);
        }

        if graph
            .global_nodes()
            .filter(|g| g.id != target_id)
            .any(|g| self.is_active(screen, g))
        {
            log::debug!("Global scene interrupts transition to '{}'", target_id);
            self.state.release_transition();
            return Ok(Window::Released);
        }

        let transition = &self.settings.transition;
        self.state.transition_stuck_count += 1;
        let checks = self.state.transition_stuck_count;

        if checks > transition.stuck_give_up_checks {
            log::warn!(
                "Transition to '{}' not observed after {} checks, giving up",
                target_id,
                transition.stuck_give_up_checks
            );
            self.state.release_transition();
            return Ok(Window::Released);
        }

        if transition.stuck_retry_every > 0 && checks % transition.stuck_retry_every == 0 {
            self.retry_transition_action(screen.dimensions(), checks);
            return Ok(Window::Waiting(Tick::TransitionRetry { checks }));
        }
        Ok(Window::Waiting(Tick::TransitionWait { checks }))
    }

    /// Re-dispatch the gesture that triggered the pending transition
    fn retry_transition_action(&mut self, screen_size: (u32, u32), checks: u32) {
        let Some(action) = self.state.last_transition_action.clone() else {
            return;
        };
        let graph = Arc::clone(&self.graph);
        let Some((scene, region)) = graph.region(&action.region_id) else {
            log::warn!("Region '{}' to retry no longer exists", action.region_id);
            return;
        };

        log::info!(
            "Transition still pending after {} checks, retrying region '{}'",
            checks,
            region.id
        );
        self.emit(EngineEvent::StuckRetry {
            region: region.id.clone(),
            checks,
        });
        self.actions
            .perform_action(&region.action, region, scene.resolution, screen_size);
    }

    fn identify(&mut self, screen: &Frame, now: u64, confirmed: bool) -> Result<Identified, EngineError> {
        let graph = Arc::clone(&self.graph);
        let current_id = self.state.current_scene_id.clone();
        let current = graph
            .node(&current_id)
            .ok_or_else(|| EngineError::UnknownScene(current_id.clone()))?;

        // Interrupts first
        for global in graph.global_nodes() {
            if !global.is_blind() && self.is_active(screen, global) {
                return Ok(Identified::Scene(global.id.clone()));
            }
        }

        // Stability bias, grace hold and blind trust
        let in_grace = self
            .state
            .in_grace_period(now, self.settings.transition.grace_period_ms);
        if confirmed || current.is_blind() || in_grace || self.is_active(screen, current) {
            return Ok(Identified::Scene(current_id));
        }

        // Neighbors, then previous, then root
        let mut candidates: Vec<String> = current.targets().into_iter().map(str::to_string).collect();
        candidates.extend(self.state.previous_scene_id.clone());
        candidates.push(graph.root().id.clone());

        let mut seen = vec![current_id.as_str()];
        for id in &candidates {
            let id = id.as_str();
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            let Some(node) = graph.node(id) else {
                continue;
            };
            if node.is_global || node.is_blind() {
                continue;
            }
            if self.is_active(screen, node) {
                return Ok(Identified::Scene(node.id.clone()));
            }
        }

        let root_id = graph.root().id.clone();
        if current.is_global {
            log::warn!("Global scene '{}' is gone, returning to root '{}'", current_id, root_id);
            self.recover(&root_id, Recovery::GlobalExit);
            return Ok(Identified::Recovered(Recovery::GlobalExit));
        }

        self.state.lost_frame_count += 1;
        let frames = self.state.lost_frame_count;
        if frames >= self.settings.transition.lost_frame_limit {
            log::warn!(
                "No scene identified for {} iterations, returning to root '{}'",
                frames,
                root_id
            );
            self.recover(&root_id, Recovery::Lost);
            return Ok(Identified::Recovered(Recovery::Lost));
        }
        log::debug!("No scene identified ({} in a row)", frames);
        Ok(Identified::Lost(frames))
    }

    fn recover(&mut self, root_id: &str, recovery: Recovery) {
        self.state.reset_to(root_id);
        self.emit(EngineEvent::Recovered {
            reason: format!("{:?}", recovery),
            scene: root_id.to_string(),
        });
    }

    /// First region that passes every gate, in priority order
    fn select_region<'g>(&mut self, screen: &Frame, scene: &'g SceneNode, now: u64) -> Option<&'g Region> {
        let clock = ScheduleClock {
            now_ms: now,
            time_of_day: self.pacer.time_of_day(),
        };
        let candidates = selector::candidates(&scene.regions, &self.state, &self.history, clock);
        candidates.into_iter().find(|region| {
            self.perception.triggers_hold(
                screen,
                &region.perception,
                scene.resolution,
                &mut self.state.variables,
            )
        })
    }

    /// Perform a region. Returns false if a stop interrupted the lead-in
    /// wait or a WAIT action; nothing is recorded then.
    fn act(&mut self, scene: &SceneNode, region: &Region, screen_size: (u32, u32)) -> bool {
        if region.wait_before > 0 && !self.wait(region.wait_before) {
            return false;
        }

        let params = &region.action.params;
        match region.action.kind {
            ActionType::CheckExit => {
                log::debug!("Region '{}' is a pure transition", region.id);
            }
            ActionType::Wait => {
                if !self.wait(params.duration.unwrap_or(DEFAULT_WAIT_MS)) {
                    return false;
                }
            }
            ActionType::LaunchApp => {
                match params.package.as_deref().or(self.origin_app.as_deref()) {
                    Some(package) => {
                        if let Err(e) = self.collaborators.focus.launch_app(package) {
                            log::error!("Failed to launch '{}': {}", package, e);
                        }
                    }
                    None => log::warn!("Region '{}' has no package to launch", region.id),
                }
            }
            _ => {
                self.actions
                    .perform_action(&region.action, region, scene.resolution, screen_size);
            }
        }

        if let Some(effect) = &region.side_effect {
            self.state.apply_side_effect(effect);
        }
        let record = self.history.record(&region.id, self.pacer.now_ms());
        log::debug!(
            "Region '{}' in scene '{}' performed (run {})",
            region.id,
            scene.name(),
            record.run_count
        );

        if region.wait_after > 0 {
            self.wait(region.wait_after);
        }
        true
    }

    fn is_active(&mut self, screen: &Frame, node: &SceneNode) -> bool {
        self.perception
            .is_state_active(screen, node, &mut self.state.variables, node.name())
    }

    /// Jittered, interruptible wait; false if stopped
    fn wait(&mut self, ms: u64) -> bool {
        let variance = self.settings.stealth.wait_variance(ms);
        self.pacer.smart_sleep(&mut self.humanizer, ms, variance)
    }

    fn pause_for(&self, tick: &Tick) -> u64 {
        let timings = &self.settings.timings;
        match tick {
            Tick::Relaunched => timings.relaunch_backoff_ms,
            Tick::CaptureFailed => timings.capture_retry_ms,
            Tick::TransitionWait { .. } | Tick::TransitionRetry { .. } => timings.transition_check_ms,
            Tick::NoEligible { .. } => timings.idle_sleep_ms,
            Tick::Acted { .. } | Tick::Lost { .. } | Tick::Recovered(_) => timings.loop_interval_ms,
        }
    }

    fn publish(&self) {
        if let Some(sink) = &self.snapshot_sink {
            if let Ok(mut slot) = sink.lock() {
                *slot = Some(self.snapshot());
            }
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(queue) = &self.collaborators.telemetry {
            queue.record(event);
        }
    }

    fn script_name(&self) -> Option<&str> {
        self.graph.metadata().name.as_deref()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::action::tests::RecordingDispatcher;
    use crate::host::{AppFocus, HostError};
    use crate::stealth::ManualClock;
    use crate::vision::perception::tests::{encoded_template, fixture_screen};
    use crate::vision::CaptureSurface;
    use chrono::NaiveTime;
    use image::{ImageBuffer, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Capture surface returning a swappable frame
    pub(crate) struct StaticCapture {
        pub(crate) frame: Mutex<Option<RgbaImage>>,
        pub(crate) calls: AtomicU32,
    }

    impl StaticCapture {
        pub(crate) fn new(frame: RgbaImage) -> Self {
            Self {
                frame: Mutex::new(Some(frame)),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn set(&self, frame: Option<RgbaImage>) {
            *self.frame.lock().unwrap() = frame;
        }
    }

    impl CaptureSurface for StaticCapture {
        fn capture_screen(&self) -> Option<RgbaImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.frame.lock().unwrap().clone()
        }
    }

    struct FakeFocus {
        foreground: Mutex<String>,
        launched: Mutex<Vec<String>>,
    }

    impl AppFocus for FakeFocus {
        fn foreground_app(&self) -> Option<String> {
            Some(self.foreground.lock().unwrap().clone())
        }

        fn origin_app(&self) -> Option<String> {
            None
        }

        fn launch_app(&self, package: &str) -> Result<(), HostError> {
            self.launched.lock().unwrap().push(package.to_string());
            Ok(())
        }
    }

    pub(crate) fn blank_screen() -> RgbaImage {
        ImageBuffer::from_pixel(200, 100, Rgba([90, 90, 90, 255]))
    }

    pub(crate) struct Harness {
        pub(crate) runner: FsmRunner,
        pub(crate) clock: Arc<ManualClock>,
        pub(crate) capture: Arc<StaticCapture>,
        pub(crate) gestures: Arc<RecordingDispatcher>,
        pub(crate) stop: Arc<AtomicBool>,
    }

    pub(crate) fn harness_with(script: &str, screen: RgbaImage, focus: Option<Arc<dyn AppFocus>>) -> Harness {
        let graph = Arc::new(ScriptGraph::from_json(script).unwrap());
        let clock = Arc::new(ManualClock::new());
        let capture = Arc::new(StaticCapture::new(screen));
        let gestures = Arc::new(RecordingDispatcher::default());
        let stop = Arc::new(AtomicBool::new(false));

        let mut collaborators = Collaborators::new(capture.clone(), gestures.clone()).with_clock(clock.clone());
        if let Some(focus) = focus {
            collaborators = collaborators.with_focus(focus);
        }
        let runner = FsmRunner::new(graph, EngineSettings::default(), collaborators, Arc::clone(&stop)).with_seed(7);
        Harness {
            runner,
            clock,
            capture,
            gestures,
            stop,
        }
    }

    pub(crate) fn harness(script: &str, screen: RgbaImage) -> Harness {
        harness_with(script, screen, None)
    }

    /// Root A (no anchors) clicks into B (image anchor on the fixture patch)
    pub(crate) fn scenario_script() -> String {
        format!(
            r#"{{
                "nodes": [
                    {{ "id": "A", "isRoot": true, "regions": [
                        {{ "id": "regionA1", "x": 40, "y": 40, "w": 20, "h": 20,
                           "action": {{ "type": "CLICK" }},
                           "schedule": {{ "priority": 5 }}, "target": "B" }}
                    ] }},
                    {{ "id": "B", "anchors": [
                        {{ "id": "patch", "matchType": "image", "x": 75, "y": 60, "w": 12, "h": 24,
                           "template": "{}" }}
                    ], "regions": [
                        {{ "id": "regionB1", "x": 0, "y": 80, "w": 20, "h": 20,
                           "action": {{ "type": "CLICK" }} }}
                    ] }}
                ]
            }}"#,
            encoded_template()
        )
    }

    const BAR: &str = r##"{ "id": "bar", "matchType": "color", "x": 0, "y": 0, "w": 100, "h": 10, "targetColor": "#1E88E5" }"##;
    const RED: &str = r##"{ "id": "red", "matchType": "color", "x": 0, "y": 40, "w": 100, "h": 20, "targetColor": "#FF0000" }"##;
    const GREEN: &str = r##"{ "id": "green", "matchType": "color", "x": 0, "y": 40, "w": 100, "h": 20, "targetColor": "#00FF00" }"##;

    #[test]
    fn test_scenario_blind_root_click_predicts_target() {
        let mut h = harness(&scenario_script(), fixture_screen());

        let tick = h.runner.step().unwrap();
        assert_eq!(
            tick,
            Tick::Acted {
                scene: "A".to_string(),
                region: "regionA1".to_string()
            }
        );

        // Region center (100, 50), 40x20 px
        let taps = h.gestures.taps();
        assert_eq!(taps.len(), 1);
        assert!((taps[0].x - 100.0).abs() <= 40.0 * 0.45 + 1e-3);
        assert!((taps[0].y - 50.0).abs() <= 20.0 * 0.45 + 1e-3);

        let state = h.runner.state();
        assert_eq!(state.current_scene_id, "B");
        assert_eq!(state.previous_scene_id.as_deref(), Some("A"));
        assert!(state.transition_pending);
        assert_eq!(h.runner.history().run_count("regionA1"), 1);
    }

    #[test]
    fn test_predicted_transition_confirmed() {
        let mut h = harness(&scenario_script(), fixture_screen());
        h.runner.step().unwrap();
        h.clock.advance(500);

        let tick = h.runner.step().unwrap();
        assert_eq!(
            tick,
            Tick::Acted {
                scene: "B".to_string(),
                region: "regionB1".to_string()
            }
        );
        assert!(!h.runner.state().transition_pending);
    }

    #[test]
    fn test_priority_ordering() {
        let script = r#"{ "nodes": [ { "id": "S", "regions": [
            { "id": "p7", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" }, "schedule": { "priority": 7 } },
            { "id": "p3", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" }, "schedule": { "priority": 3 } },
            { "id": "p5", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" }, "schedule": { "priority": 5 } },
            { "id": "p3b", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" }, "schedule": { "priority": 3 } }
        ] } ] }"#;
        let mut h = harness(script, blank_screen());
        assert_eq!(
            h.runner.step().unwrap(),
            Tick::Acted {
                scene: "S".to_string(),
                region: "p3".to_string()
            }
        );
    }

    #[test]
    fn test_count_schedule_until_history_cleared() {
        let script = r#"{ "nodes": [ { "id": "S", "regions": [
            { "id": "twice", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" },
              "schedule": { "mode": "COUNT", "maxTimes": 2 } }
        ] } ] }"#;
        let mut h = harness(script, blank_screen());

        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
        assert!(matches!(h.runner.step().unwrap(), Tick::NoEligible { .. }));
        assert_eq!(h.gestures.count(), 2);

        h.runner.shutdown();
        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
    }

    #[test]
    fn test_interval_schedule_with_simulated_clock() {
        let script = r#"{ "nodes": [ { "id": "S", "regions": [
            { "id": "every5s", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" },
              "schedule": { "mode": "INTERVAL", "interval": 5000 } }
        ] } ] }"#;
        let mut h = harness(script, blank_screen());

        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
        assert!(matches!(h.runner.step().unwrap(), Tick::NoEligible { .. }));
        h.clock.advance(4000);
        assert!(matches!(h.runner.step().unwrap(), Tick::NoEligible { .. }));
        h.clock.advance(1000);
        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
    }

    #[test]
    fn test_blind_current_scene_is_trusted() {
        let script = format!(
            r#"{{ "nodes": [
                {{ "id": "root", "isRoot": true, "anchors": [ {red} ] }},
                {{ "id": "blind", "regions": [
                    {{ "id": "go", "x": 0, "y": 0, "w": 10, "h": 10, "action": {{ "type": "CHECK_EXIT" }} }}
                ] }}
            ] }}"#,
            red = RED
        );
        let mut h = harness(&script, blank_screen());
        h.runner.state.reset_to("blind");

        assert_eq!(
            h.runner.step().unwrap(),
            Tick::Acted {
                scene: "blind".to_string(),
                region: "go".to_string()
            }
        );
        assert_eq!(h.gestures.count(), 0);
        assert_eq!(h.runner.state().current_scene_id, "blind");
    }

    #[test]
    fn test_stuck_transition_retry_cadence() {
        let script = format!(
            r#"{{ "nodes": [
                {{ "id": "a", "isRoot": true, "anchors": [ {red} ], "regions": [
                    {{ "id": "go", "x": 40, "y": 40, "w": 20, "h": 20, "action": {{ "type": "CLICK" }}, "target": "b" }}
                ] }},
                {{ "id": "b", "anchors": [ {green} ] }}
            ] }}"#,
            red = RED,
            green = GREEN
        );
        let mut h = harness(&script, blank_screen());
        h.runner.state.predict_transition(
            "b",
            0,
            TransitionAction {
                scene_id: "a".to_string(),
                region_id: "go".to_string(),
            },
        );

        let mut retries = Vec::new();
        for check in 1..=20u32 {
            h.clock.advance(500);
            match h.runner.step().unwrap() {
                Tick::TransitionRetry { checks } => {
                    assert_eq!(checks, check);
                    retries.push(check);
                }
                Tick::TransitionWait { checks } => assert_eq!(checks, check),
                other => panic!("check {}: unexpected {:?}", check, other),
            }
        }
        assert_eq!(retries, vec![6, 12, 18]);
        assert_eq!(h.gestures.count(), 3);

        // Check 21 abandons the wait and identifies normally
        h.clock.advance(500);
        let tick = h.runner.step().unwrap();
        assert!(!matches!(
            tick,
            Tick::TransitionWait { .. } | Tick::TransitionRetry { .. }
        ));
        assert!(!h.runner.state().transition_pending);
        assert_eq!(h.gestures.count(), 3);
    }

    #[test]
    fn test_previous_scene_still_visible_counts_as_stuck() {
        let script = format!(
            r#"{{ "nodes": [
                {{ "id": "a", "isRoot": true, "anchors": [ {bar} ], "regions": [
                    {{ "id": "go", "x": 40, "y": 40, "w": 20, "h": 20, "action": {{ "type": "CLICK" }}, "target": "b" }}
                ] }},
                {{ "id": "b", "anchors": [ {green} ] }}
            ] }}"#,
            bar = BAR,
            green = GREEN
        );
        let mut h = harness(&script, fixture_screen());

        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
        assert_eq!(h.runner.state().current_scene_id, "b");

        h.clock.advance(500);
        assert_eq!(h.runner.step().unwrap(), Tick::TransitionWait { checks: 1 });
        assert_eq!(h.gestures.count(), 1);
    }

    #[test]
    fn test_global_scene_interrupts_and_exits() {
        let script = format!(
            r#"{{ "nodes": [
                {{ "id": "home", "isRoot": true, "regions": [
                    {{ "id": "idle", "x": 0, "y": 0, "w": 10, "h": 10, "action": {{ "type": "CHECK_EXIT" }},
                       "schedule": {{ "mode": "COUNT", "maxTimes": 0 }} }}
                ] }},
                {{ "id": "popup", "isGlobal": true, "anchors": [ {bar} ], "regions": [
                    {{ "id": "close", "x": 90, "y": 0, "w": 10, "h": 10, "action": {{ "type": "CLICK" }} }}
                ] }}
            ] }}"#,
            bar = BAR
        );
        let mut h = harness(&script, fixture_screen());

        assert_eq!(
            h.runner.step().unwrap(),
            Tick::Acted {
                scene: "popup".to_string(),
                region: "close".to_string()
            }
        );
        assert_eq!(h.runner.state().current_scene_id, "popup");

        h.capture.set(Some(blank_screen()));
        assert_eq!(h.runner.step().unwrap(), Tick::Recovered(Recovery::GlobalExit));
        assert_eq!(h.runner.state().current_scene_id, "home");
    }

    #[test]
    fn test_lost_recovery_resets_to_root() {
        let script = format!(
            r#"{{ "nodes": [
                {{ "id": "home", "isRoot": true, "anchors": [ {red} ] }},
                {{ "id": "shop", "anchors": [ {green} ] }}
            ] }}"#,
            red = RED,
            green = GREEN
        );
        let mut h = harness(&script, blank_screen());
        h.runner.state.reset_to("shop");

        for frame in 1..20 {
            assert_eq!(h.runner.step().unwrap(), Tick::Lost { frames: frame });
        }
        assert_eq!(h.runner.step().unwrap(), Tick::Recovered(Recovery::Lost));
        assert_eq!(h.runner.state().current_scene_id, "home");
        assert_eq!(h.runner.state().lost_frame_count, 0);
    }

    #[test]
    fn test_neighbor_identified_by_perception() {
        let script = format!(
            r#"{{ "nodes": [
                {{ "id": "home", "isRoot": true, "anchors": [ {red} ], "regions": [
                    {{ "id": "open", "x": 0, "y": 0, "w": 10, "h": 10, "action": {{ "type": "CLICK" }}, "target": "menu" }}
                ] }},
                {{ "id": "menu", "anchors": [ {bar} ] }}
            ] }}"#,
            red = RED,
            bar = BAR
        );
        let mut h = harness(&script, fixture_screen());
        assert_eq!(
            h.runner.step().unwrap(),
            Tick::NoEligible {
                scene: "menu".to_string()
            }
        );
        assert_eq!(h.runner.state().previous_scene_id.as_deref(), Some("home"));
    }

    #[test]
    fn test_focus_guard_relaunches_without_acting() {
        let script = r#"{ "metadata": { "packageName": "com.example.game" },
            "nodes": [ { "id": "S", "regions": [
                { "id": "tap", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" } }
            ] } ] }"#;
        let focus = Arc::new(FakeFocus {
            foreground: Mutex::new("com.android.launcher".to_string()),
            launched: Mutex::new(Vec::new()),
        });
        let mut h = harness_with(script, blank_screen(), Some(focus.clone()));

        assert_eq!(h.runner.step().unwrap(), Tick::Relaunched);
        assert_eq!(h.gestures.count(), 0);
        assert_eq!(h.capture.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*focus.launched.lock().unwrap(), vec!["com.example.game".to_string()]);

        *focus.foreground.lock().unwrap() = "com.example.game".to_string();
        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
    }

    #[test]
    fn test_capture_failure() {
        let script = r#"{ "nodes": [ { "id": "S" } ] }"#;
        let mut h = harness(script, blank_screen());
        h.capture.set(None);
        assert_eq!(h.runner.step().unwrap(), Tick::CaptureFailed);
    }

    #[test]
    fn test_side_effect_and_condition() {
        let script = r#"{ "variables": { "stamina": 1 }, "nodes": [ { "id": "S", "regions": [
            { "id": "spend", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" },
              "condition": { "variable": "stamina" },
              "sideEffect": { "type": "DECREMENT", "variable": "stamina" } }
        ] } ] }"#;
        let mut h = harness(script, blank_screen());

        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
        assert_eq!(h.runner.state().variable("stamina"), 0);
        assert!(matches!(h.runner.step().unwrap(), Tick::NoEligible { .. }));
    }

    #[test]
    fn test_wait_action_and_region_waits() {
        let script = r#"{ "nodes": [ { "id": "S", "regions": [
            { "id": "pause", "x": 0, "y": 0, "w": 10, "h": 10,
              "action": { "type": "WAIT", "params": { "duration": 2000 } },
              "waitBefore": 300, "waitAfter": 400 }
        ] } ] }"#;
        let mut h = harness(script, blank_screen());
        assert!(matches!(h.runner.step().unwrap(), Tick::Acted { .. }));
        assert_eq!(h.gestures.count(), 0);
        // Jitter is at most a few sigma of 20% per wait
        let slept = h.clock.total_slept();
        assert!((1_500..=3_500).contains(&slept), "slept {}", slept);
    }

    #[test]
    fn test_stop_interrupts_lead_in_wait() {
        let script = r#"{ "nodes": [ { "id": "S", "regions": [
            { "id": "tap", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" }, "waitBefore": 1000 }
        ] } ] }"#;
        let mut h = harness(script, blank_screen());
        h.stop.store(true, Ordering::SeqCst);
        assert!(matches!(h.runner.step().unwrap(), Tick::NoEligible { .. }));
        assert_eq!(h.gestures.count(), 0);
        assert!(h.runner.history().is_empty());
    }

    #[test]
    fn test_stop_during_wait_action_records_nothing() {
        let script = r#"{ "variables": { "energy": 3 }, "nodes": [ { "id": "S", "regions": [
            { "id": "rest", "x": 0, "y": 0, "w": 10, "h": 10,
              "action": { "type": "WAIT", "params": { "duration": 2000 } },
              "sideEffect": { "type": "DECREMENT", "variable": "energy" },
              "waitAfter": 400 }
        ] } ] }"#;
        let mut h = harness(script, blank_screen());
        h.stop.store(true, Ordering::SeqCst);

        assert!(matches!(h.runner.step().unwrap(), Tick::NoEligible { .. }));
        assert!(h.runner.history().is_empty());
        assert_eq!(h.runner.state().variable("energy"), 3);
        assert_eq!(h.clock.total_slept(), 0);
    }

    #[test]
    fn test_time_schedule_follows_clock_time_of_day() {
        let script = r#"{ "nodes": [ { "id": "S", "regions": [
            { "id": "evening", "x": 0, "y": 0, "w": 10, "h": 10, "action": { "type": "CLICK" },
              "schedule": { "mode": "TIME", "time": "18:30" } }
        ] } ] }"#;
        let mut h = harness(script, blank_screen());

        h.clock.set_time_of_day(NaiveTime::from_hms_opt(18, 29, 0).unwrap());
        assert_eq!(
            h.runner.step().unwrap(),
            Tick::NoEligible {
                scene: "S".to_string()
            }
        );
        assert_eq!(h.gestures.count(), 0);

        h.clock.set_time_of_day(NaiveTime::from_hms_opt(18, 30, 0).unwrap());
        assert_eq!(
            h.runner.step().unwrap(),
            Tick::Acted {
                scene: "S".to_string(),
                region: "evening".to_string()
            }
        );
        assert_eq!(h.gestures.count(), 1);
    }

    struct PanickingCapture {
        calls: AtomicU32,
        stop: Arc<AtomicBool>,
    }

    impl CaptureSurface for PanickingCapture {
        fn capture_screen(&self) -> Option<RgbaImage> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("capture exploded");
            }
            self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
            None
        }
    }

    #[test]
    fn test_run_survives_panicking_iteration() {
        let graph = Arc::new(ScriptGraph::from_json(r#"{ "nodes": [ { "id": "S" } ] }"#).unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let capture = Arc::new(PanickingCapture {
            calls: AtomicU32::new(0),
            stop: Arc::clone(&stop),
        });
        let collaborators = Collaborators::new(capture.clone(), Arc::new(RecordingDispatcher::default()))
            .with_clock(Arc::new(ManualClock::new()));
        let sink = Arc::new(Mutex::new(None));
        let mut runner = FsmRunner::new(graph, EngineSettings::default(), collaborators, stop)
            .with_snapshot_sink(Arc::clone(&sink));

        runner.run();

        assert_eq!(capture.calls.load(Ordering::SeqCst), 2);
        let snapshot = sink.lock().unwrap().clone().unwrap();
        assert_eq!(snapshot.iterations, 2);
        assert!(snapshot.history.is_empty());
    }
}
