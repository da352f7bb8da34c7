//! Screen capture handling
//!
//! The host supplies screenshots through [`CaptureSurface`]; this module
//! also holds the pixel helpers perception needs (cropping, color sampling).

use image::{imageops, ImageBuffer, Rgba, RgbaImage};

use super::matcher::SearchCache;
use super::VisionError;

/// Source of screenshots
pub trait CaptureSurface: Send + Sync {
    /// Take a screenshot, blocking up to the host's bound (about 2s).
    /// `None` signals a transient capture failure.
    fn capture_screen(&self) -> Option<RgbaImage>;
}

/// One screenshot plus the template-search data derived from it.
///
/// Every anchor checked against the same capture shares the prepared
/// data, so it is built at most once per frame.
pub struct Frame {
    image: RgbaImage,
    search: SearchCache,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            search: SearchCache::default(),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Prepared search data
    pub fn search(&self) -> &SearchCache {
        &self.search
    }
}

impl From<RgbaImage> for Frame {
    fn from(image: RgbaImage) -> Self {
        Self::new(image)
    }
}

/// Build a frame from raw RGBA bytes
pub fn frame_from_raw(frame_data: &[u8], width: u32, height: u32) -> Result<RgbaImage, VisionError> {
    // Validate frame data size
    let expected_size = width as usize * height as usize * 4;
    if width == 0 || height == 0 || frame_data.len() != expected_size {
        return Err(VisionError::InvalidFrameData);
    }

    ImageBuffer::from_raw(width, height, frame_data.to_vec()).ok_or(VisionError::InvalidFrameData)
}

/// Extract a region of a frame, `None` if it is out of bounds or empty
pub fn extract_region(frame: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> Option<RgbaImage> {
    let (frame_width, frame_height) = frame.dimensions();
    if width == 0 || height == 0 || x + width > frame_width || y + height > frame_height {
        return None;
    }
    Some(imageops::crop_imm(frame, x, y, width, height).to_image())
}

/// Mean RGB of a region
pub fn mean_color(frame: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> Option<[f32; 3]> {
    let (frame_width, frame_height) = frame.dimensions();
    if width == 0 || height == 0 || x + width > frame_width || y + height > frame_height {
        return None;
    }

    let mut sum = [0u64; 3];
    for py in y..y + height {
        for px in x..x + width {
            let pixel = frame.get_pixel(px, py);
            sum[0] += pixel[0] as u64;
            sum[1] += pixel[1] as u64;
            sum[2] += pixel[2] as u64;
        }
    }

    let count = (width as u64 * height as u64) as f32;
    Some([
        sum[0] as f32 / count,
        sum[1] as f32 / count,
        sum[2] as f32 / count,
    ])
}

/// RGB of the center pixel of a region
pub fn center_color(frame: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> Option<[f32; 3]> {
    let cx = x + width / 2;
    let cy = y + height / 2;
    if width == 0 || height == 0 || cx >= frame.width() || cy >= frame.height() {
        return None;
    }
    let pixel: &Rgba<u8> = frame.get_pixel(cx, cy);
    Some([pixel[0] as f32, pixel[1] as f32, pixel[2] as f32])
}

/// Euclidean distance between two RGB colors
pub fn color_distance(a: [f32; 3], b: [u8; 3]) -> f32 {
    let dr = a[0] - b[0] as f32;
    let dg = a[1] - b[1] as f32;
    let db = a[2] - b[2] as f32;
    (dr * dr + dg * dg + db * db).sqrt()
}
