//! Host collaborators
//!
//! Everything the engine needs from the device (screenshots, gestures, app
//! focus, user notices and the optional OCR / remote / telemetry backends)
//! is injected as trait objects bundled in [`Collaborators`].

use std::sync::Arc;

use crate::action::GestureDispatcher;
use crate::stealth::{Clock, SystemClock};
use crate::telemetry::TelemetryQueue;
use crate::vision::{CaptureSurface, RemoteClassifier, TextRecognizer};

/// Collaborator failures
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Host call failed: {0}")]
    Call(String),
    #[error("Gesture rejected by host")]
    GestureRejected,
    #[error("Host not available")]
    Unavailable,
    #[error("JNI error: {0}")]
    Jni(#[from] jni::errors::Error),
}

/// App-focus surface
pub trait AppFocus: Send + Sync {
    /// Package currently in the foreground
    fn foreground_app(&self) -> Option<String>;

    /// Package the script was launched against
    fn origin_app(&self) -> Option<String>;

    /// Bring `package` to the foreground
    fn launch_app(&self, package: &str) -> Result<(), HostError>;
}

/// User-visible notices (script load failures)
pub trait UserNotifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn notify(&self, message: &str) {
        log::warn!("User notice: {}", message);
    }
}

/// Focus surface for hosts that cannot observe app focus; never drifts
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFocus;

impl AppFocus for NoFocus {
    fn foreground_app(&self) -> Option<String> {
        None
    }

    fn origin_app(&self) -> Option<String> {
        None
    }

    fn launch_app(&self, package: &str) -> Result<(), HostError> {
        log::warn!("Cannot launch '{}': no app focus surface", package);
        Err(HostError::Unavailable)
    }
}

/// Collaborators injected into the engine
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn CaptureSurface>,
    pub gestures: Arc<dyn GestureDispatcher>,
    pub focus: Arc<dyn AppFocus>,
    pub notifier: Arc<dyn UserNotifier>,
    pub clock: Arc<dyn Clock>,
    pub ocr: Option<Arc<dyn TextRecognizer>>,
    pub remote: Option<Arc<dyn RemoteClassifier>>,
    pub telemetry: Option<TelemetryQueue>,
}

impl Collaborators {
    /// Bundle the mandatory surfaces; focus, notices and clock take defaults
    pub fn new(capture: Arc<dyn CaptureSurface>, gestures: Arc<dyn GestureDispatcher>) -> Self {
        Self {
            capture,
            gestures,
            focus: Arc::new(NoFocus),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock::new()),
            ocr: None,
            remote: None,
            telemetry: None,
        }
    }

    pub fn with_focus(mut self, focus: Arc<dyn AppFocus>) -> Self {
        self.focus = focus;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ocr(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.ocr = Some(recognizer);
        self
    }

    pub fn with_remote(mut self, classifier: Arc<dyn RemoteClassifier>) -> Self {
        self.remote = Some(classifier);
        self
    }

    pub fn with_telemetry(mut self, queue: TelemetryQueue) -> Self {
        self.telemetry = Some(queue);
        self
    }
}

/// Package the engine should keep in the foreground
pub fn origin_app(focus: &dyn AppFocus, script_package: Option<&str>) -> Option<String> {
    focus
        .origin_app()
        .or_else(|| script_package.map(str::to_string))
        .filter(|p| !p.is_empty())
}

/// Foreground package when it differs from `origin`; unknown focus never drifts
pub fn focus_drift(focus: &dyn AppFocus, origin: Option<&str>) -> Option<String> {
    let origin = origin?;
    let foreground = focus.foreground_app().filter(|p| !p.is_empty())?;
    (foreground != origin).then_some(foreground)
}
