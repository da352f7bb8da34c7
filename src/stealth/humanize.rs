//! Human behavior simulation for anti-detection
//!
//! Adds realistic variance to automated gestures so taps never land on the
//! exact same pixel and delays never repeat exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Delays never drop below this (ms)
pub const MIN_DELAY_MS: u64 = 10;

/// Tap offsets are clamped to this fraction of the target size
pub const MAX_OFFSET_FRACTION: f32 = 0.45;

/// Humanizer for generating realistic timing and positions
pub struct Humanizer {
    rng: StdRng,
}

impl Default for Humanizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Humanizer {
    /// Create a new humanizer seeded from system entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a deterministic humanizer (for testing)
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Sample a normal distribution (Box-Muller)
    pub fn gaussian(&mut self, mean: f32, sigma: f32) -> f32 {
        let u1: f32 = self.rng.gen::<f32>().max(f32::MIN_POSITIVE);
        let u2: f32 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
        mean + z * sigma
    }

    /// Jitter a delay: `base ± N(0, variance / 3)`, floored at 10ms
    pub fn jitter_delay(&mut self, base_ms: u64, variance_ms: u64) -> u64 {
        if variance_ms == 0 {
            return base_ms.max(MIN_DELAY_MS);
        }
        let jittered = self.gaussian(base_ms as f32, variance_ms as f32 / 3.0);
        (jittered.round() as i64).max(MIN_DELAY_MS as i64) as u64
    }

    /// Gaussian offset from the center of a target of length `size`.
    ///
    /// `sigma = max(1, size / 6)`, clamped to ±45% of `size`.
    pub fn gaussian_offset(&mut self, size: f32) -> f32 {
        let sigma = (size / 6.0).max(1.0);
        let limit = size.max(0.0) * MAX_OFFSET_FRACTION;
        self.gaussian(0.0, sigma).clamp(-limit, limit)
    }

    /// Uniform perturbation in `[-max, max]`
    pub fn perturb(&mut self, max: f32) -> f32 {
        if max <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-max..=max)
    }

    /// Uniform integer in an inclusive range (`low` when the range is empty)
    pub fn range_u64(&mut self, (low, high): (u64, u64)) -> u64 {
        if low >= high {
            return low;
        }
        self.rng.gen_range(low..=high)
    }

    /// Uniform float in an inclusive range (`low` when the range is empty)
    pub fn range_f32(&mut self, (low, high): (f32, f32)) -> f32 {
        if low >= high {
            return low;
        }
        self.rng.gen_range(low..=high)
    }

    /// Random sign
    pub fn sign(&mut self) -> f32 {
        if self.rng.gen_bool(0.5) {
            1.0
        } else {
            -1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_delay_floor() {
        let mut humanizer = Humanizer::with_seed(7);
        for _ in 0..1000 {
            assert!(humanizer.jitter_delay(15, 300) >= MIN_DELAY_MS);
        }
        assert_eq!(humanizer.jitter_delay(0, 0), MIN_DELAY_MS);
    }

    #[test]
    fn test_jitter_delay_variance() {
        let mut humanizer = Humanizer::with_seed(11);
        let base = 500u64;

        let mut min_seen = base;
        let mut max_seen = base;
        for _ in 0..1000 {
            let delay = humanizer.jitter_delay(base, 150);
            min_seen = min_seen.min(delay);
            max_seen = max_seen.max(delay);
        }

        // Should see variance in both directions
        assert!(min_seen < base);
        assert!(max_seen > base);
    }

    #[test]
    fn test_zero_variance_returns_base() {
        let mut humanizer = Humanizer::with_seed(3);
        for _ in 0..10 {
            assert_eq!(humanizer.jitter_delay(500, 0), 500);
        }
    }

    #[test]
    fn test_gaussian_offset_clamped() {
        let mut humanizer = Humanizer::with_seed(42);
        for size in [1.0f32, 12.0, 80.0, 400.0] {
            for _ in 0..2000 {
                let offset = humanizer.gaussian_offset(size);
                assert!(offset.abs() <= size * MAX_OFFSET_FRACTION + f32::EPSILON);
            }
        }
    }

    #[test]
    fn test_gaussian_mean() {
        let mut humanizer = Humanizer::with_seed(5);
        let n = 10_000;
        let mean: f32 = (0..n).map(|_| humanizer.gaussian(10.0, 2.0)).sum::<f32>() / n as f32;
        assert!((mean - 10.0).abs() < 0.2);
    }

    #[test]
    fn test_ranges() {
        let mut humanizer = Humanizer::with_seed(9);
        for _ in 0..100 {
            let v = humanizer.range_u64((100, 200));
            assert!((100..=200).contains(&v));
            let f = humanizer.range_f32((0.1, 0.3));
            assert!((0.1..=0.3).contains(&f));
            assert!(humanizer.perturb(2.5).abs() <= 2.5);
        }
        assert_eq!(humanizer.range_u64((5, 5)), 5);
        assert_eq!(humanizer.perturb(0.0), 0.0);
    }
}
