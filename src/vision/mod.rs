//! Vision and image processing module
//!
//! Handles screenshots, template matching, OCR and remote perception, and
//! combines them into scene and trigger checks.

pub mod capture;
pub mod matcher;
pub mod ocr;
pub mod perception;
pub mod remote;
pub mod worker;

pub use capture::{CaptureSurface, Frame};
pub use matcher::{ImageMatcher, MatchResult};
pub use ocr::{OcrEngine, OcrError, TextRecognizer};
pub use perception::PerceptionSystem;
pub use remote::{RemoteClassifier, RemoteRequest, RemoteResponse};
pub use worker::{CallError, CallWorker};

/// Vision system errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Failed to process image: {0}")]
    ImageProcessingError(String),
    #[error("Invalid frame data")]
    InvalidFrameData,
    #[error("Failed to decode template: {0}")]
    TemplateDecode(String),
    #[error("Remote perception failed: {0}")]
    Remote(String),
}
