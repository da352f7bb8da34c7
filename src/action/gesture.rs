//! Gesture strokes and curved swipe paths

use kurbo::{ParamCurve, Point, QuadBez, Vec2};
use serde::{Deserialize, Serialize};

use crate::host::HostError;

/// Points sampled per single-stroke swipe
const SWIPE_SAMPLES: usize = 16;

/// Ease-in / cruise / ease-out split of a segmented swipe
const SEGMENT_BREAKS: [f64; 2] = [0.2, 0.8];
const SEGMENT_SHARES: [u64; 3] = [30, 40, 30];

/// A point in screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GesturePoint {
    pub x: f32,
    pub y: f32,
}

impl GesturePoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Clamp into `[0, width) x [0, height)`
    pub fn clamped(self, screen: (u32, u32)) -> Self {
        let max_x = screen.0.saturating_sub(1) as f32;
        let max_y = screen.1.saturating_sub(1) as f32;
        Self {
            x: self.x.clamp(0.0, max_x),
            y: self.y.clamp(0.0, max_y),
        }
    }

    fn to_kurbo(self) -> Point {
        Point::new(self.x as f64, self.y as f64)
    }

    fn from_kurbo(point: Point) -> Self {
        Self::new(point.x as f32, point.y as f32)
    }
}

/// One continuous touch path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub path: Vec<GesturePoint>,
    /// Offset from the start of the gesture (ms)
    pub start_delay_ms: u64,
    pub duration_ms: u64,
    /// The next stroke continues this one without lifting the finger
    pub will_continue: bool,
}

impl Stroke {
    /// Single-point press held for `duration_ms`
    pub fn tap(point: GesturePoint, duration_ms: u64) -> Self {
        Self {
            path: vec![point],
            start_delay_ms: 0,
            duration_ms,
            will_continue: false,
        }
    }
}

/// Actuation surface
pub trait GestureDispatcher: Send + Sync {
    /// Dispatch one gesture made of `strokes`
    fn dispatch(&self, strokes: &[Stroke]) -> Result<(), HostError>;

    /// Global back action
    fn press_back(&self) -> Result<(), HostError>;
}

/// Quadratic Bézier swipe path bent away from the straight line
#[derive(Debug, Clone, Copy)]
pub struct SwipeCurve {
    curve: QuadBez,
}

impl SwipeCurve {
    /// Curve from `start` to `end` whose control point sits `bend` times the
    /// travel distance off the midpoint, perpendicular to the travel
    /// direction (negative `bend` bends to the other side)
    pub fn new(start: GesturePoint, end: GesturePoint, bend: f32) -> Self {
        let p0 = start.to_kurbo();
        let p2 = end.to_kurbo();
        let travel: Vec2 = p2 - p0;
        let length = travel.hypot();
        let normal = if length > f64::EPSILON {
            Vec2::new(-travel.y / length, travel.x / length)
        } else {
            Vec2::ZERO
        };
        let control = p0.midpoint(p2) + normal * (bend as f64 * length);
        Self {
            curve: QuadBez::new(p0, control, p2),
        }
    }

    /// Point at parameter `t` in `[0, 1]`
    pub fn point_at(&self, t: f64) -> GesturePoint {
        GesturePoint::from_kurbo(self.curve.eval(t.clamp(0.0, 1.0)))
    }

    /// Control point of the curve
    pub fn control(&self) -> GesturePoint {
        GesturePoint::from_kurbo(self.curve.p1)
    }

    /// Strokes for a swipe lasting `duration_ms`.
    ///
    /// Segmented swipes are three straight strokes through the curve points
    /// at t=0.2 and t=0.8, taking 30/40/30% of the time. Otherwise the curve
    /// is sampled into a single polyline stroke.
    pub fn strokes(&self, duration_ms: u64, segmented: bool, screen: (u32, u32)) -> Vec<Stroke> {
        if !segmented {
            let path = (0..=SWIPE_SAMPLES)
                .map(|i| self.point_at(i as f64 / SWIPE_SAMPLES as f64).clamped(screen))
                .collect();
            return vec![Stroke {
                path,
                start_delay_ms: 0,
                duration_ms: duration_ms.max(1),
                will_continue: false,
            }];
        }

        let knots = [0.0, SEGMENT_BREAKS[0], SEGMENT_BREAKS[1], 1.0];
        let first = duration_ms * SEGMENT_SHARES[0] / 100;
        let second = duration_ms * SEGMENT_SHARES[1] / 100;
        let durations = [first, second, duration_ms.saturating_sub(first + second)];

        let mut strokes = Vec::with_capacity(3);
        let mut offset = 0;
        for (i, duration) in durations.into_iter().enumerate() {
            let duration = duration.max(1);
            strokes.push(Stroke {
                path: vec![
                    self.point_at(knots[i]).clamped(screen),
                    self.point_at(knots[i + 1]).clamped(screen),
                ],
                start_delay_ms: offset,
                duration_ms: duration,
                will_continue: i < 2,
            });
            offset += duration;
        }
        strokes
    }
}
