//! OCR for text anchors and number extraction
//!
//! Recognition itself is provided by the host through [`TextRecognizer`];
//! the engine runs it on one worker thread, bounds every call and
//! post-processes the text.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use super::worker::{CallError, CallWorker};

/// Text recognition backend
pub trait TextRecognizer: Send + Sync {
    /// Recognize all text in an image
    fn recognize(&self, image: &RgbaImage) -> Result<String, OcrError>;
}

type OcrWorker = CallWorker<RgbaImage, Result<String, OcrError>>;

/// OCR engine with a bounded call time
#[derive(Clone)]
pub struct OcrEngine {
    worker: Option<OcrWorker>,
    timeout: Duration,
}

impl OcrEngine {
    /// Create an engine without a backend; every read fails as unavailable
    pub fn new(timeout: Duration) -> Self {
        Self {
            worker: None,
            timeout,
        }
    }

    /// Create an engine backed by `recognizer`
    pub fn with_recognizer(recognizer: Arc<dyn TextRecognizer>, timeout: Duration) -> Self {
        let worker = CallWorker::spawn("ocr-worker", move |image: RgbaImage| recognizer.recognize(&image));
        match worker {
            Ok(worker) => Self {
                worker: Some(worker),
                timeout,
            },
            Err(e) => {
                log::error!("Failed to start OCR worker: {}", e);
                Self::new(timeout)
            }
        }
    }

    /// Whether a backend is configured
    pub fn is_available(&self) -> bool {
        self.worker.is_some()
    }

    /// Whether an earlier (possibly timed out) read is still running
    pub fn is_busy(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.in_flight())
    }

    /// Read text from an image region
    pub fn read_text(&self, image: &RgbaImage) -> Result<String, OcrError> {
        let worker = self.worker.as_ref().ok_or(OcrError::Unavailable)?;
        let text = worker
            .call(image.clone(), self.timeout)
            .map_err(|e| match e {
                CallError::Busy => OcrError::Busy,
                CallError::TimedOut => OcrError::Timeout(self.timeout.as_millis() as u64),
                CallError::Closed => OcrError::ProcessingError("OCR worker failed".to_string()),
            })??;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(OcrError::NoTextFound);
        }
        Ok(text)
    }

    /// Read a number from an image region
    pub fn read_number(&self, image: &RgbaImage) -> Result<i64, OcrError> {
        let text = self.read_text(image)?;
        extract_number(&text).ok_or(OcrError::NoTextFound)
    }
}

/// Extract the first integer in `text`.
///
/// A comma or dot followed by exactly three digits is a group separator,
/// so "1,250" and "1.250" read as 1250. Any other separator ends the
/// number: "1.5" reads as 1. A leading '-' directly before the digits
/// makes the value negative.
pub fn extract_number(text: &str) -> Option<i64> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|c| c.is_ascii_digit())?;
    let negative = start > 0 && chars[start - 1] == '-';

    let mut digits = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            digits.push(c);
        } else if (c == ',' || c == '.') && is_digit_group(&chars[i + 1..]) {
            // Group separator
        } else {
            break;
        }
        i += 1;
    }

    let value: i64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Exactly three digits, then a non-digit or the end
fn is_digit_group(rest: &[char]) -> bool {
    rest.len() >= 3
        && rest[..3].iter().all(|c| c.is_ascii_digit())
        && !rest.get(3).is_some_and(|c| c.is_ascii_digit())
}

/// Case-insensitive substring test
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// OCR error types
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR backend not available")]
    Unavailable,
    #[error("Failed to process image: {0}")]
    ProcessingError(String),
    #[error("No text found")]
    NoTextFound,
    #[error("OCR timed out after {0}ms")]
    Timeout(u64),
    #[error("Previous OCR call still running")]
    Busy,
}
