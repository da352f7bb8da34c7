//! Gesture encoding for the accessibility service
//!
//! Strokes cross JNI as one flat `float[]` so a gesture costs a single
//! array copy. The Kotlin side rebuilds `GestureDescription.StrokeDescription`
//! objects from it.
//!
//! Layout:
//! - `[0]`: stroke count
//! - per stroke: `startDelay, duration, willContinue (0/1), pointCount`,
//!   followed by `pointCount` pairs of `x, y`

use crate::action::Stroke;

/// Floats in a stroke header
const STROKE_HEADER: usize = 4;

/// Flatten strokes into the JNI gesture layout
pub fn encode_strokes(strokes: &[Stroke]) -> Vec<f32> {
    let len = 1 + strokes
        .iter()
        .map(|s| STROKE_HEADER + s.path.len() * 2)
        .sum::<usize>();
    let mut out = Vec::with_capacity(len);

    out.push(strokes.len() as f32);
    for stroke in strokes {
        out.push(stroke.start_delay_ms as f32);
        out.push(stroke.duration_ms as f32);
        out.push(if stroke.will_continue { 1.0 } else { 0.0 });
        out.push(stroke.path.len() as f32);
        for point in &stroke.path {
            out.push(point.x);
            out.push(point.y);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{GesturePoint, SwipeCurve};

    #[test]
    fn test_encode_tap() {
        let encoded = encode_strokes(&[Stroke::tap(GesturePoint::new(540.0, 1200.5), 85)]);
        assert_eq!(encoded, vec![1.0, 0.0, 85.0, 0.0, 1.0, 540.0, 1200.5]);
    }

    #[test]
    fn test_encode_segmented_swipe() {
        let curve = SwipeCurve::new(GesturePoint::new(500.0, 1800.0), GesturePoint::new(500.0, 1400.0), 0.2);
        let strokes = curve.strokes(500, true, (1080, 2400));
        let encoded = encode_strokes(&strokes);

        assert_eq!(encoded[0], 3.0);
        assert_eq!(encoded.len(), 1 + 3 * (STROKE_HEADER + 4));
        // Second stroke header: delay 150, duration 200, continues, 2 points
        let second = 1 + STROKE_HEADER + 4;
        assert_eq!(&encoded[second..second + STROKE_HEADER], &[150.0, 200.0, 1.0, 2.0]);
        assert!(encoded.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode_strokes(&[]), vec![0.0]);
    }
}
