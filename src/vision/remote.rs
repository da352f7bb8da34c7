//! Remote perception for the `ai` match type
//!
//! A cropped region is JPEG-encoded and sent with a natural-language prompt
//! to a host-provided classifier.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::VisionError;

/// Request mode: yes/no classification or value extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteMode {
    Match,
    Extract,
}

/// Request sent to the remote endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRequest {
    pub prompt: String,
    pub image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<RemoteMode>,
}

/// Endpoint answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteResponse {
    #[serde(rename = "match", default)]
    pub matched: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl RemoteResponse {
    /// Parse an endpoint reply
    pub fn from_json(json: &str) -> Result<Self, VisionError> {
        serde_json::from_str(json).map_err(|e| VisionError::Remote(e.to_string()))
    }

    /// An explicit `match: true`, or a non-empty extracted value
    pub fn is_match(&self) -> bool {
        self.matched == Some(true) || self.value_text().is_some()
    }

    /// Extracted value as text, if any
    pub fn value_text(&self) -> Option<String> {
        let text = match self.value.as_ref()? {
            Value::Null => return None,
            Value::Bool(false) => return None,
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Remote classification backend
pub trait RemoteClassifier: Send + Sync {
    /// Submit a request, blocking until the endpoint answers
    fn classify(&self, request: &RemoteRequest) -> Result<RemoteResponse, VisionError>;
}

/// JPEG-encode an image and return it base64-encoded
pub fn encode_jpeg_base64(image: &RgbaImage) -> Result<String, VisionError> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let mut bytes = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .map_err(|e| VisionError::ImageProcessingError(e.to_string()))?;
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    #[test]
    fn test_response_match_rules() {
        let explicit = RemoteResponse::from_json(r#"{"match": true, "reason": "dialog"}"#).unwrap();
        assert!(explicit.is_match());
        assert_eq!(explicit.value_text(), None);

        let extracted = RemoteResponse::from_json(r#"{"value": 120}"#).unwrap();
        assert!(extracted.is_match());
        assert_eq!(extracted.value_text().as_deref(), Some("120"));

        let empty = RemoteResponse::from_json(r#"{"match": false, "value": "  "}"#).unwrap();
        assert!(!empty.is_match());

        assert!(RemoteResponse::from_json("not json").is_err());
    }

    #[test]
    fn test_request_serialization() {
        let request = RemoteRequest {
            prompt: "Is a reward dialog visible?".to_string(),
            image_base64: "AAAA".to_string(),
            mode: Some(RemoteMode::Extract),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["imageBase64"], "AAAA");
        assert_eq!(json["mode"], "extract");
    }

    #[test]
    fn test_encode_jpeg() {
        let image: RgbaImage = ImageBuffer::from_pixel(16, 16, Rgba([10, 200, 30, 255]));
        let encoded = encode_jpeg_base64(&image).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        // JPEG SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
