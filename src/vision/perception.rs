//! Scene and trigger perception
//!
//! Evaluates anchors (image, color, text, remote) against a screenshot,
//! decides whether a scene is on screen, and writes extracted values into
//! the engine's variables.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbaImage;

use super::capture::{center_color, color_distance, extract_region, mean_color, Frame};
use super::matcher::ImageMatcher;
use super::ocr::{contains_ignore_case, extract_number, OcrEngine, TextRecognizer};
use super::remote::{encode_jpeg_base64, RemoteClassifier, RemoteMode, RemoteRequest, RemoteResponse};
use super::worker::{CallError, CallWorker};
use super::VisionError;
use crate::config::VisionSettings;
use crate::graph::{Anchor, ColorSampling, MatchType, Projection, Resolution, SceneNode, Variables};

/// Result of one anchor check
#[derive(Debug, Default)]
struct AnchorOutcome {
    matched: bool,
    /// Text recognized or extracted along the way
    text: Option<String>,
}

impl AnchorOutcome {
    fn miss() -> Self {
        Self::default()
    }

    fn hit(text: Option<String>) -> Self {
        Self {
            matched: true,
            text,
        }
    }
}

type RemoteWorker = CallWorker<RemoteRequest, Result<RemoteResponse, VisionError>>;

/// Perception system for scene identification and region triggers
pub struct PerceptionSystem {
    settings: VisionSettings,
    matcher: ImageMatcher,
    ocr: OcrEngine,
    remote: Option<RemoteWorker>,
    /// Decoded templates; `None` remembers a template that failed to decode
    templates: HashMap<u64, Option<Arc<RgbaImage>>>,
}

impl PerceptionSystem {
    /// Create a perception system without OCR or remote backends
    pub fn new(settings: VisionSettings) -> Self {
        let ocr = OcrEngine::new(Duration::from_millis(settings.ocr_timeout_ms));
        Self {
            settings,
            matcher: ImageMatcher::new(),
            ocr,
            remote: None,
            templates: HashMap::new(),
        }
    }

    /// Use `recognizer` for text anchors
    pub fn with_text_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.ocr = OcrEngine::with_recognizer(
            recognizer,
            Duration::from_millis(self.settings.ocr_timeout_ms),
        );
        self
    }

    /// Use `classifier` for `ai` anchors
    pub fn with_remote_classifier(mut self, classifier: Arc<dyn RemoteClassifier>) -> Self {
        match CallWorker::spawn("remote-perception", move |request: RemoteRequest| {
            classifier.classify(&request)
        }) {
            Ok(worker) => self.remote = Some(worker),
            Err(e) => log::error!("Failed to start remote perception worker: {}", e),
        }
        self
    }

    /// Whether `node` is on screen: at least `minMatches` anchors hold.
    ///
    /// A scene without anchors is never confirmed here.
    pub fn is_state_active(
        &mut self,
        screen: &Frame,
        node: &SceneNode,
        variables: &mut Variables,
        scene_name: &str,
    ) -> bool {
        if node.anchors.is_empty() {
            return false;
        }

        // Every anchor is evaluated so value extraction runs for all of them
        let matched = node
            .anchors
            .iter()
            .filter(|anchor| self.check_anchor(screen, anchor, node.resolution, variables))
            .count();

        let active = matched >= node.min_matches();
        log::debug!(
            "Scene '{}': {}/{} anchors matched (need {}) -> {}",
            scene_name,
            matched,
            node.anchors.len(),
            node.min_matches(),
            active
        );
        active
    }

    /// Whether any of a region's extra triggers holds (true when it has none)
    pub fn triggers_hold(
        &mut self,
        screen: &Frame,
        triggers: &[Anchor],
        resolution: Option<Resolution>,
        variables: &mut Variables,
    ) -> bool {
        triggers.is_empty()
            || triggers
                .iter()
                .any(|trigger| self.check_anchor(screen, trigger, resolution, variables))
    }

    /// Evaluate a single anchor
    pub fn check_anchor(
        &mut self,
        screen: &Frame,
        anchor: &Anchor,
        resolution: Option<Resolution>,
        variables: &mut Variables,
    ) -> bool {
        let projection = Projection::new(screen.width(), screen.height(), resolution);
        let outcome = match anchor.match_type {
            MatchType::Image => self.check_image(screen, anchor, &projection),
            MatchType::Color => self.check_color(screen, anchor, &projection),
            MatchType::Text => self.check_text(screen, anchor, &projection),
            MatchType::Ai => self.check_remote(screen, anchor, &projection),
        };

        if outcome.matched {
            if let Some(variable) = &anchor.variable_name {
                store_extracted(variables, variable, &anchor.id, outcome.text.as_deref());
            }
        }
        outcome.matched
    }

    /// Drop all decoded templates
    pub fn clear_cache(&mut self) {
        self.templates.clear();
    }

    /// Number of cached template entries
    pub fn cached_templates(&self) -> usize {
        self.templates.len()
    }

    fn check_image(&mut self, screen: &Frame, anchor: &Anchor, projection: &Projection) -> AnchorOutcome {
        let Some(template) = self.template(anchor) else {
            return AnchorOutcome::miss();
        };
        let threshold = anchor.threshold.unwrap_or(self.settings.image_threshold);
        let Some(found) = self
            .matcher
            .find_in_frame(screen, &template, threshold, projection.scale())
        else {
            return AnchorOutcome::miss();
        };

        if found.score >= self.settings.high_score_pardon {
            return AnchorOutcome::hit(None);
        }

        let position = (found.x as f32, found.y as f32);
        if projection.agrees(&anchor.rect, position, self.settings.position_tolerance) {
            AnchorOutcome::hit(None)
        } else {
            log::debug!(
                "Anchor '{}' matched ({:.2}) at {:?}, away from its authored position",
                anchor.id,
                found.score,
                position
            );
            AnchorOutcome::miss()
        }
    }

    fn check_color(&self, screen: &Frame, anchor: &Anchor, projection: &Projection) -> AnchorOutcome {
        let screen = screen.image();
        let Some(target) = anchor.target_color else {
            return AnchorOutcome::miss();
        };
        let Some((x, y, w, h)) = projection
            .rect(&anchor.rect)
            .clamped(screen.width(), screen.height())
        else {
            return AnchorOutcome::miss();
        };

        let sample = match anchor.sampling {
            ColorSampling::Mean => mean_color(screen, x, y, w, h),
            ColorSampling::Center => center_color(screen, x, y, w, h),
        };
        let Some(sample) = sample else {
            return AnchorOutcome::miss();
        };

        let tolerance = anchor.tolerance.unwrap_or(self.settings.color_tolerance);
        if color_distance(sample, target.rgb()) < tolerance {
            AnchorOutcome::hit(None)
        } else {
            AnchorOutcome::miss()
        }
    }

    fn check_text(&self, screen: &Frame, anchor: &Anchor, projection: &Projection) -> AnchorOutcome {
        let Some(crop) = crop_anchor(screen.image(), anchor, projection) else {
            return AnchorOutcome::miss();
        };
        let text = match self.ocr.read_text(&crop) {
            Ok(text) => text,
            Err(e) => {
                log::debug!("OCR for anchor '{}' failed: {}", anchor.id, e);
                return AnchorOutcome::miss();
            }
        };

        let expected = anchor.target_text.as_deref().unwrap_or_default();
        if contains_ignore_case(&text, expected) {
            AnchorOutcome::hit(Some(text))
        } else {
            AnchorOutcome::miss()
        }
    }

    fn check_remote(&self, screen: &Frame, anchor: &Anchor, projection: &Projection) -> AnchorOutcome {
        let Some(worker) = &self.remote else {
            log::warn!("Anchor '{}' needs remote perception but none is configured", anchor.id);
            return AnchorOutcome::miss();
        };
        let Some(crop) = crop_anchor(screen.image(), anchor, projection) else {
            return AnchorOutcome::miss();
        };
        let image_base64 = match encode_jpeg_base64(&crop) {
            Ok(encoded) => encoded,
            Err(e) => {
                log::warn!("Failed to encode anchor '{}': {}", anchor.id, e);
                return AnchorOutcome::miss();
            }
        };

        let request = RemoteRequest {
            prompt: anchor.target_prompt.clone().unwrap_or_default(),
            image_base64,
            mode: Some(if anchor.variable_name.is_some() {
                RemoteMode::Extract
            } else {
                RemoteMode::Match
            }),
        };
        let timeout = Duration::from_millis(self.settings.remote_timeout_ms);
        let response = match worker.call(request, timeout) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                log::warn!("Remote perception for anchor '{}' failed: {}", anchor.id, e);
                return AnchorOutcome::miss();
            }
            Err(CallError::Busy) => {
                log::debug!("Remote perception busy, skipping anchor '{}'", anchor.id);
                return AnchorOutcome::miss();
            }
            Err(e) => {
                log::warn!("Remote perception for anchor '{}': {}", anchor.id, e);
                return AnchorOutcome::miss();
            }
        };

        if let Some(reason) = &response.reason {
            log::debug!("Remote perception for '{}': {}", anchor.id, reason);
        }
        if response.is_match() {
            AnchorOutcome::hit(response.value_text())
        } else {
            AnchorOutcome::miss()
        }
    }

    /// Decoded template for an anchor, from cache when possible
    fn template(&mut self, anchor: &Anchor) -> Option<Arc<RgbaImage>> {
        let source = anchor.template.as_deref()?;
        let mut hasher = DefaultHasher::new();
        anchor.id.hash(&mut hasher);
        source.hash(&mut hasher);
        let key = hasher.finish();

        self.templates
            .entry(key)
            .or_insert_with(|| match decode_template(source) {
                Ok(image) => Some(Arc::new(image)),
                Err(e) => {
                    log::warn!("Anchor '{}' template unusable: {}", anchor.id, e);
                    None
                }
            })
            .clone()
    }
}

/// Decode a base64 (optionally data-URL or percent-encoded) image
pub fn decode_template(source: &str) -> Result<RgbaImage, VisionError> {
    let mut payload = source.trim();
    if payload.starts_with("data:") {
        payload = payload
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| VisionError::TemplateDecode("data URL without payload".to_string()))?;
    }

    let decoded;
    if payload.contains('%') {
        decoded = urlencoding::decode(payload)
            .map_err(|e| VisionError::TemplateDecode(e.to_string()))?
            .into_owned();
        payload = &decoded;
    }

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| VisionError::TemplateDecode(e.to_string()))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| VisionError::TemplateDecode(e.to_string()))?;
    Ok(image.to_rgba8())
}

fn crop_anchor(screen: &RgbaImage, anchor: &Anchor, projection: &Projection) -> Option<RgbaImage> {
    let (x, y, w, h) = projection
        .rect(&anchor.rect)
        .clamped(screen.width(), screen.height())?;
    extract_region(screen, x, y, w, h)
}

fn store_extracted(variables: &mut Variables, variable: &str, anchor_id: &str, text: Option<&str>) {
    match text.and_then(extract_number) {
        Some(value) => {
            log::debug!("Anchor '{}' set '{}' = {}", anchor_id, variable, value);
            variables.insert(variable.to_string(), value);
        }
        None => log::warn!(
            "Anchor '{}' matched but yielded no number for '{}' ({:?})",
            anchor_id,
            variable,
            text
        ),
    }
}
