//! Coordinate projection between authored scripts and the device screen
//!
//! Scripts store rectangles as percentages of the screen they were authored
//! on. When the authoring resolution is known, points are reprojected with
//! smart alignment: each axis is pinned to its nearest edge (or the center)
//! and scaled by the width ratio, which keeps edge-docked controls in place
//! when the device aspect ratio differs from the authoring one.

use serde::{Deserialize, Serialize};

/// Percentages below this are measured from the left/top edge
const START_EDGE_PERCENT: f32 = 33.0;
/// Percentages above this are measured from the right/bottom edge
const END_EDGE_PERCENT: f32 = 66.0;

/// Rectangle expressed in percent of the screen (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub w: f32,
    #[serde(default)]
    pub h: f32,
}

impl Rect {
    /// Create a new percentage rectangle
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Horizontal center in percent
    pub fn center_x(&self) -> f32 {
        self.x + self.w / 2.0
    }

    /// Vertical center in percent
    pub fn center_y(&self) -> f32 {
        self.y + self.h / 2.0
    }

    /// Check that every component is a usable percentage
    pub fn validate(&self) -> Result<(), String> {
        let fields = [("x", self.x), ("y", self.y), ("w", self.w), ("h", self.h)];
        for (name, value) in fields {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(format!("{} = {} is outside 0-100", name, value));
            }
        }
        Ok(())
    }
}

/// Reference resolution a scene was authored against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Rectangle in device pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    /// Center point
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Integer crop box clamped to a `screen_w` x `screen_h` image.
    /// Returns `None` if nothing of the rectangle is on screen.
    pub fn clamped(&self, screen_w: u32, screen_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0) as u32;
        let y0 = self.y.floor().max(0.0) as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(screen_w);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(screen_h);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Which edge an axis position is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisAlign {
    Start,
    Center,
    End,
}

impl AxisAlign {
    /// Pick the alignment for a percentage position
    pub fn for_percent(percent: f32) -> Self {
        if percent < START_EDGE_PERCENT {
            AxisAlign::Start
        } else if percent > END_EDGE_PERCENT {
            AxisAlign::End
        } else {
            AxisAlign::Center
        }
    }
}

/// Project one axis position authored at `authored_len` onto `device_len`
pub fn project_axis(percent: f32, authored_len: f32, device_len: f32, scale: f32) -> f32 {
    let authored = percent / 100.0 * authored_len;
    match AxisAlign::for_percent(percent) {
        AxisAlign::Start => authored * scale,
        AxisAlign::End => device_len - (authored_len - authored) * scale,
        AxisAlign::Center => device_len / 2.0 + (authored - authored_len / 2.0) * scale,
    }
}

/// Projection from script percentages to device pixels
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    screen_width: f32,
    screen_height: f32,
    resolution: Option<Resolution>,
}

impl Projection {
    /// Create a projection for a device screen and optional authoring resolution
    pub fn new(screen_width: u32, screen_height: u32, resolution: Option<Resolution>) -> Self {
        Self {
            screen_width: screen_width as f32,
            screen_height: screen_height as f32,
            resolution: resolution.filter(|r| r.width > 0 && r.height > 0),
        }
    }

    /// Expected scale of authored content on this device (width ratio)
    pub fn scale(&self) -> Option<f32> {
        self.resolution
            .map(|r| self.screen_width / r.width as f32)
    }

    /// Project a percentage point into device pixels
    pub fn point(&self, percent_x: f32, percent_y: f32) -> (f32, f32) {
        match (self.resolution, self.scale()) {
            (Some(res), Some(scale)) => (
                project_axis(percent_x, res.width as f32, self.screen_width, scale),
                project_axis(percent_y, res.height as f32, self.screen_height, scale),
            ),
            _ => (
                percent_x / 100.0 * self.screen_width,
                percent_y / 100.0 * self.screen_height,
            ),
        }
    }

    /// Project a percentage rectangle into device pixels, keeping its center
    /// on the smart-aligned position
    pub fn rect(&self, rect: &Rect) -> PixelRect {
        let (cx, cy) = self.point(rect.center_x(), rect.center_y());
        let (width, height) = match (self.resolution, self.scale()) {
            (Some(res), Some(scale)) => (
                rect.w / 100.0 * res.width as f32 * scale,
                rect.h / 100.0 * res.height as f32 * scale,
            ),
            _ => (
                rect.w / 100.0 * self.screen_width,
                rect.h / 100.0 * self.screen_height,
            ),
        };
        PixelRect {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    /// Whether a found position agrees with the rectangle's authored center
    /// within `tolerance` (fraction of each screen dimension)
    pub fn agrees(&self, rect: &Rect, found: (f32, f32), tolerance: f32) -> bool {
        let (ex, ey) = self.point(rect.center_x(), rect.center_y());
        (found.0 - ex).abs() <= tolerance * self.screen_width
            && (found.1 - ey).abs() <= tolerance * self.screen_height
    }

    /// Device screen size in pixels
    pub fn screen(&self) -> (f32, f32) {
        (self.screen_width, self.screen_height)
    }
}
