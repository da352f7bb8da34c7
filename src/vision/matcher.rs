//! Template matching over screenshots
//!
//! Normalized cross-correlation on RGB: coefficient-normalized when the
//! template is opaque, mask-weighted when it carries transparency. Large
//! screenshots are searched coarse-to-fine, and templates are retried over a
//! ladder of scales. Prepared screen data lives in a [`SearchCache`] so all
//! templates checked against one capture share it.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use ndarray::{Array2, Array3};
use once_cell::unsync::OnceCell;

use super::capture::Frame;
use super::VisionError;

/// Templates smaller than this (px, either side) are not searched
const MIN_TEMPLATE_SIDE: u32 = 10;

/// Standard scale ladder
const SCALE_LADDER: [f32; 11] = [0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.3, 1.4, 1.5];

/// Ladder order when the expected scale is unknown (outward from 1.0)
const DEFAULT_SCALE_ORDER: [f32; 11] = [1.0, 0.9, 1.1, 0.8, 1.2, 0.7, 1.3, 0.6, 1.4, 0.5, 1.5];

/// Ladder entries this close to the expected scale are skipped
const LADDER_EXCLUSION: f32 = 0.15;

/// Screens with more pixels than this are searched coarse-to-fine
const PYRAMID_MIN_PIXELS: u64 = 250_000;

/// Side (px) a template is shrunk towards for the coarse pass
const PYRAMID_COARSE_SIDE: u32 = 8;

/// Largest downsampling factor
const PYRAMID_MAX_FACTOR: u32 = 6;

/// Coarse candidates refined at full resolution
const PYRAMID_CANDIDATES: usize = 8;

/// Coarse windows with less than this share of the template's variance
/// cannot hold it
const COARSE_MIN_CONTRAST: f64 = 0.25;

const FLAT_EPSILON: f64 = 1e-6;

/// Result of a successful template search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Center of the match (screen pixels)
    pub x: u32,
    pub y: u32,
    /// Correlation score (0-1)
    pub score: f32,
    /// Matched size (screen pixels)
    pub width: u32,
    pub height: u32,
    /// Template scale that produced the match
    pub scale: f32,
}

/// Scales to try, in order
pub fn candidate_scales(expected_scale: Option<f32>) -> Vec<f32> {
    match expected_scale.filter(|s| s.is_finite() && *s > 0.0) {
        Some(expected) => {
            let mut scales = vec![expected, expected * 0.9, expected * 1.1];
            scales.extend(
                SCALE_LADDER
                    .iter()
                    .copied()
                    .filter(|s| (s - expected).abs() >= LADDER_EXCLUSION),
            );
            scales
        }
        None => DEFAULT_SCALE_ORDER.to_vec(),
    }
}

/// Screenshot prepared for repeated correlation: pixels plus integral images
struct SearchImage {
    width: usize,
    height: usize,
    pixels: Array3<f32>,
    sum: Array3<f64>,
    sq_sum: Array3<f64>,
}

impl SearchImage {
    fn new(image: &RgbaImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let mut pixels = Array3::<f32>::zeros((height, width, 3));
        let mut sum = Array3::<f64>::zeros((height + 1, width + 1, 3));
        let mut sq_sum = Array3::<f64>::zeros((height + 1, width + 1, 3));

        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                pixels[[y, x, c]] = pixel[c] as f32;
            }
        }

        for y in 0..height {
            for x in 0..width {
                for c in 0..3 {
                    let v = pixels[[y, x, c]] as f64;
                    sum[[y + 1, x + 1, c]] =
                        v + sum[[y, x + 1, c]] + sum[[y + 1, x, c]] - sum[[y, x, c]];
                    sq_sum[[y + 1, x + 1, c]] =
                        v * v + sq_sum[[y, x + 1, c]] + sq_sum[[y + 1, x, c]] - sq_sum[[y, x, c]];
                }
            }
        }

        Self {
            width,
            height,
            pixels,
            sum,
            sq_sum,
        }
    }

    /// Prepare only the given rectangle of `image`
    fn of_region(image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new(&imageops::crop_imm(image, x, y, width, height).to_image())
    }

    fn data(&self) -> Result<&[f32], VisionError> {
        self.pixels
            .as_slice()
            .ok_or_else(|| VisionError::ImageProcessingError("non-contiguous frame".to_string()))
    }

    /// Per-channel sums and squared sums of a window
    fn window_stats(&self, x: usize, y: usize, w: usize, h: usize) -> ([f64; 3], [f64; 3]) {
        let mut s = [0.0; 3];
        let mut sq = [0.0; 3];
        for c in 0..3 {
            s[c] = self.sum[[y + h, x + w, c]] - self.sum[[y, x + w, c]] - self.sum[[y + h, x, c]]
                + self.sum[[y, x, c]];
            sq[c] = self.sq_sum[[y + h, x + w, c]]
                - self.sq_sum[[y, x + w, c]]
                - self.sq_sum[[y + h, x, c]]
                + self.sq_sum[[y, x, c]];
        }
        (s, sq)
    }
}

/// Screen data derived from one screenshot, built on first use.
///
/// Full-resolution integral images are only needed when the screen is
/// searched exhaustively; the coarse-to-fine path keeps one downsampled
/// image per factor and prepares small refinement windows on demand.
#[derive(Default)]
pub struct SearchCache {
    full: OnceCell<SearchImage>,
    coarse: [OnceCell<SearchImage>; PYRAMID_MAX_FACTOR as usize - 1],
}

impl SearchCache {
    fn full(&self, screen: &RgbaImage) -> &SearchImage {
        self.full.get_or_init(|| SearchImage::new(screen))
    }

    fn coarse(&self, screen: &RgbaImage, factor: u32) -> &SearchImage {
        let factor = factor.clamp(2, PYRAMID_MAX_FACTOR);
        self.coarse[(factor - 2) as usize].get_or_init(|| SearchImage::new(&downsample(screen, factor)))
    }

    /// Number of prepared images (full and coarse)
    pub fn prepared(&self) -> usize {
        usize::from(self.full.get().is_some()) + self.coarse.iter().filter(|c| c.get().is_some()).count()
    }

    /// Whether the full-resolution image was prepared
    pub fn has_full_resolution(&self) -> bool {
        self.full.get().is_some()
    }
}

/// Template prepared for correlation
struct Template {
    width: usize,
    height: usize,
    pixels: Vec<[f32; 3]>,
    /// Alpha weights, present only for templates with transparency
    mask: Option<Vec<f32>>,
    /// Zero-mean pixels (opaque templates)
    centered: Vec<[f32; 3]>,
    mean: [f64; 3],
    variance: f64,
    /// Energy of the masked template
    masked_energy: f64,
}

impl Template {
    fn new(image: &RgbaImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let pixels: Vec<[f32; 3]> = image
            .pixels()
            .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
            .collect();

        let has_alpha = image.pixels().any(|p| p[3] < u8::MAX);
        let mask = has_alpha.then(|| image.pixels().map(|p| p[3] as f32 / 255.0).collect::<Vec<_>>());

        let n = (width * height).max(1) as f64;
        let mut mean = [0.0f64; 3];
        for p in &pixels {
            for c in 0..3 {
                mean[c] += p[c] as f64;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let centered: Vec<[f32; 3]> = pixels
            .iter()
            .map(|p| {
                [
                    (p[0] as f64 - mean[0]) as f32,
                    (p[1] as f64 - mean[1]) as f32,
                    (p[2] as f64 - mean[2]) as f32,
                ]
            })
            .collect();
        let variance = centered
            .iter()
            .map(|p| p.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>())
            .sum();

        let masked_energy = match &mask {
            Some(weights) => pixels
                .iter()
                .zip(weights)
                .map(|(p, m)| p.iter().map(|v| ((v * m) as f64).powi(2)).sum::<f64>())
                .sum(),
            None => 0.0,
        };

        Self {
            width,
            height,
            pixels,
            mask,
            centered,
            mean,
            variance,
            masked_energy,
        }
    }

    /// Whether the window at (x, y) has too little contrast to hold an
    /// opaque, textured template
    fn too_flat_at(&self, screen: &SearchImage, x: usize, y: usize) -> bool {
        if self.mask.is_some() || self.variance < FLAT_EPSILON {
            return false;
        }
        let n = (self.width * self.height) as f64;
        let (s, sq) = screen.window_stats(x, y, self.width, self.height);
        let window_variance: f64 = (0..3).map(|c| sq[c] - s[c] * s[c] / n).sum();
        window_variance < self.variance * COARSE_MIN_CONTRAST
    }

    /// Score of the template placed with its top-left corner at (x, y)
    fn score_at(&self, screen: &SearchImage, data: &[f32], x: usize, y: usize) -> f32 {
        let stride = screen.width * 3;
        let score = match &self.mask {
            Some(mask) => {
                let mut numerator = 0.0f64;
                let mut window_energy = 0.0f64;
                for ty in 0..self.height {
                    let row = (y + ty) * stride;
                    for tx in 0..self.width {
                        let i = ty * self.width + tx;
                        let m = mask[i];
                        if m <= 0.0 {
                            continue;
                        }
                        let base = row + (x + tx) * 3;
                        let t = &self.pixels[i];
                        for c in 0..3 {
                            let im = data[base + c] * m;
                            numerator += (t[c] * m * im) as f64;
                            window_energy += (im * im) as f64;
                        }
                    }
                }
                if window_energy < FLAT_EPSILON || self.masked_energy < FLAT_EPSILON {
                    0.0
                } else {
                    numerator / (self.masked_energy * window_energy).sqrt()
                }
            }
            None => {
                let n = (self.width * self.height) as f64;
                let (s, sq) = screen.window_stats(x, y, self.width, self.height);
                let window_variance: f64 = (0..3).map(|c| sq[c] - s[c] * s[c] / n).sum();

                if self.variance < FLAT_EPSILON {
                    // Flat template: compare mean colors, penalize textured windows
                    let mean_diff = (0..3)
                        .map(|c| (s[c] / n - self.mean[c]).powi(2))
                        .sum::<f64>()
                        .sqrt()
                        / (255.0 * 3f64.sqrt());
                    let window_std = (window_variance.max(0.0) / (3.0 * n)).sqrt() / 255.0;
                    1.0 - mean_diff - window_std
                } else if window_variance < FLAT_EPSILON {
                    0.0
                } else {
                    let mut numerator = 0.0f64;
                    for ty in 0..self.height {
                        let row = (y + ty) * stride;
                        for tx in 0..self.width {
                            let base = row + (x + tx) * 3;
                            let t = &self.centered[ty * self.width + tx];
                            for c in 0..3 {
                                numerator += (t[c] * data[base + c]) as f64;
                            }
                        }
                    }
                    numerator / (self.variance * window_variance).sqrt()
                }
            }
        };
        score.clamp(0.0, 1.0) as f32
    }
}

/// Inclusive range of top-left positions to evaluate
#[derive(Debug, Clone, Copy)]
struct SearchWindow {
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

impl SearchWindow {
    /// Every placement on a `width` x `height` screen
    fn full(width: usize, height: usize, tpl: &Template) -> Option<Self> {
        if tpl.width > width || tpl.height > height {
            return None;
        }
        Some(Self {
            x0: 0,
            y0: 0,
            x1: width - tpl.width,
            y1: height - tpl.height,
        })
    }

    /// Placements within `radius` of (cx, cy)
    fn around(width: usize, height: usize, tpl: &Template, cx: usize, cy: usize, radius: usize) -> Option<Self> {
        let full = Self::full(width, height, tpl)?;
        Some(Self {
            x0: cx.saturating_sub(radius).min(full.x1),
            y0: cy.saturating_sub(radius).min(full.y1),
            x1: (cx + radius).min(full.x1),
            y1: (cy + radius).min(full.y1),
        })
    }
}

/// Template matcher with multi-scale retry
#[derive(Debug, Default, Clone)]
pub struct ImageMatcher;

impl ImageMatcher {
    /// Create a new matcher
    pub fn new() -> Self {
        Self
    }

    /// Find `template` in `screen`.
    ///
    /// Returns the first scale whose best score reaches `threshold`. Any
    /// processing failure is logged and reported as no match.
    pub fn find_template(
        &self,
        screen: &RgbaImage,
        template: &RgbaImage,
        threshold: f32,
        expected_scale: Option<f32>,
    ) -> Option<MatchResult> {
        self.search(screen, &SearchCache::default(), template, threshold, expected_scale)
    }

    /// Like [`find_template`](Self::find_template), reusing the frame's
    /// prepared search data
    pub fn find_in_frame(
        &self,
        frame: &Frame,
        template: &RgbaImage,
        threshold: f32,
        expected_scale: Option<f32>,
    ) -> Option<MatchResult> {
        self.search(frame.image(), frame.search(), template, threshold, expected_scale)
    }

    fn search(
        &self,
        screen: &RgbaImage,
        cache: &SearchCache,
        template: &RgbaImage,
        threshold: f32,
        expected_scale: Option<f32>,
    ) -> Option<MatchResult> {
        match self.try_find(screen, cache, template, threshold, expected_scale) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Template search failed: {}", e);
                None
            }
        }
    }

    fn try_find(
        &self,
        screen: &RgbaImage,
        cache: &SearchCache,
        template: &RgbaImage,
        threshold: f32,
        expected_scale: Option<f32>,
    ) -> Result<Option<MatchResult>, VisionError> {
        if template.width() == 0 || template.height() == 0 {
            return Err(VisionError::ImageProcessingError("empty template".to_string()));
        }
        if screen.width() == 0 || screen.height() == 0 {
            return Err(VisionError::InvalidFrameData);
        }

        let mut best: Option<MatchResult> = None;

        for scale in candidate_scales(expected_scale) {
            let width = (template.width() as f32 * scale).round() as u32;
            let height = (template.height() as f32 * scale).round() as u32;
            if width < MIN_TEMPLATE_SIDE
                || height < MIN_TEMPLATE_SIDE
                || width > screen.width()
                || height > screen.height()
            {
                continue;
            }

            let scaled: Cow<RgbaImage> = if width == template.width() && height == template.height() {
                Cow::Borrowed(template)
            } else {
                Cow::Owned(imageops::resize(template, width, height, FilterType::Triangle))
            };

            let Some((score, left, top)) = self.locate(screen, cache, &scaled)? else {
                continue;
            };

            let result = MatchResult {
                x: left + width / 2,
                y: top + height / 2,
                score,
                width,
                height,
                scale,
            };
            if score >= threshold {
                return Ok(Some(result));
            }
            if best.map_or(true, |b| score > b.score) {
                best = Some(result);
            }
        }

        if let Some(b) = best {
            log::debug!(
                "Best template score {:.3} (scale {:.2}) below threshold {:.2}",
                b.score,
                b.scale,
                threshold
            );
        }
        Ok(best.filter(|b| b.score >= threshold))
    }

    /// Best (score, left, top) of a template at its current size
    fn locate(
        &self,
        screen: &RgbaImage,
        cache: &SearchCache,
        template: &RgbaImage,
    ) -> Result<Option<(f32, u32, u32)>, VisionError> {
        let tpl = Template::new(template);
        let (screen_w, screen_h) = (screen.width() as usize, screen.height() as usize);

        let factor = pyramid_factor(screen, template);
        if factor == 1 {
            let prepared = cache.full(screen);
            let Some(window) = SearchWindow::full(screen_w, screen_h, &tpl) else {
                return Ok(None);
            };
            let found = best_in(prepared, prepared.data()?, &tpl, window);
            return Ok(found.map(|(s, x, y)| (s, x as u32, y as u32)));
        }

        // Coarse pass on downsampled images
        let coarse = cache.coarse(screen, factor);
        let coarse_data = coarse.data()?;
        let coarse_tpl = Template::new(&downsample(template, factor));
        let Some(window) = SearchWindow::full(coarse.width, coarse.height, &coarse_tpl) else {
            return Ok(None);
        };

        let mut scores = Array2::<f32>::zeros((window.y1 + 1, window.x1 + 1));
        for y in window.y0..=window.y1 {
            for x in window.x0..=window.x1 {
                if !coarse_tpl.too_flat_at(coarse, x, y) {
                    scores[[y, x]] = coarse_tpl.score_at(coarse, coarse_data, x, y);
                }
            }
        }

        // Refine the strongest coarse peaks in small full-resolution windows
        let factor = factor as usize;
        let suppression = (coarse_tpl.width.min(coarse_tpl.height) / 2).max(1);
        let mut best: Option<(f32, usize, usize)> = None;
        for (cx, cy) in top_peaks(&mut scores, PYRAMID_CANDIDATES, suppression) {
            let Some(window) =
                SearchWindow::around(screen_w, screen_h, &tpl, cx * factor, cy * factor, factor * 2)
            else {
                continue;
            };
            let region = SearchImage::of_region(
                screen,
                window.x0 as u32,
                window.y0 as u32,
                (window.x1 - window.x0 + tpl.width) as u32,
                (window.y1 - window.y0 + tpl.height) as u32,
            );
            let local = SearchWindow {
                x0: 0,
                y0: 0,
                x1: window.x1 - window.x0,
                y1: window.y1 - window.y0,
            };
            if let Some((score, x, y)) = best_in(&region, region.data()?, &tpl, local) {
                if best.map_or(true, |b| score > b.0) {
                    best = Some((score, x + window.x0, y + window.y0));
                }
            }
        }
        Ok(best.map(|(s, x, y)| (s, x as u32, y as u32)))
    }
}

/// Exhaustive search inside a window
fn best_in(
    screen: &SearchImage,
    data: &[f32],
    tpl: &Template,
    window: SearchWindow,
) -> Option<(f32, usize, usize)> {
    let mut best: Option<(f32, usize, usize)> = None;
    for y in window.y0..=window.y1 {
        for x in window.x0..=window.x1 {
            let score = tpl.score_at(screen, data, x, y);
            if best.map_or(true, |b| score > b.0) {
                best = Some((score, x, y));
            }
        }
    }
    best
}

/// Take up to `count` maxima, suppressing each one's neighborhood
fn top_peaks(scores: &mut Array2<f32>, count: usize, radius: usize) -> Vec<(usize, usize)> {
    let (rows, cols) = scores.dim();
    let mut peaks = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(((py, px), &value)) = scores
            .indexed_iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            break;
        };
        if value <= 0.0 {
            break;
        }
        peaks.push((px, py));
        for y in py.saturating_sub(radius)..(py + radius + 1).min(rows) {
            for x in px.saturating_sub(radius)..(px + radius + 1).min(cols) {
                scores[[y, x]] = 0.0;
            }
        }
    }
    peaks
}

fn pyramid_factor(screen: &RgbaImage, template: &RgbaImage) -> u32 {
    let pixels = screen.width() as u64 * screen.height() as u64;
    if pixels < PYRAMID_MIN_PIXELS {
        return 1;
    }
    let side = template.width().min(template.height());
    (side / PYRAMID_COARSE_SIDE).clamp(2, PYRAMID_MAX_FACTOR)
}

fn downsample(image: &RgbaImage, factor: u32) -> RgbaImage {
    let width = (image.width() / factor).max(1);
    let height = (image.height() / factor).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}
