//! Action system
//!
//! Turns a region's abstract action into humanized strokes for the host's
//! gesture dispatcher. Failures are logged here and never reach the run
//! loop.

pub mod gesture;

use std::sync::Arc;

pub use gesture::{GestureDispatcher, GesturePoint, Stroke, SwipeCurve};

use crate::graph::{ActionConfig, ActionType, Projection, Rect, Region, Resolution, SwipeDirection};
use crate::host::HostError;
use crate::stealth::{Humanizer, Pacer, StealthConfig};

/// Default hold for WAIT actions (ms)
pub const DEFAULT_WAIT_MS: u64 = 1000;

/// Executes region actions as gestures
pub struct ActionSystem {
    dispatcher: Arc<dyn GestureDispatcher>,
    humanizer: Humanizer,
    config: StealthConfig,
    pacer: Pacer,
}

impl ActionSystem {
    /// Create an action system
    pub fn new(dispatcher: Arc<dyn GestureDispatcher>, config: StealthConfig, pacer: Pacer) -> Self {
        Self {
            dispatcher,
            humanizer: Humanizer::new(),
            config,
            pacer,
        }
    }

    /// Use a specific humanizer (seeded in tests)
    pub fn with_humanizer(mut self, humanizer: Humanizer) -> Self {
        self.humanizer = humanizer;
        self
    }

    /// Perform `action` on `region`.
    ///
    /// LAUNCH_APP, WAIT and CHECK_EXIT produce no gesture; the engine
    /// handles them.
    pub fn perform_action(
        &mut self,
        action: &ActionConfig,
        region: &Region,
        resolution: Option<Resolution>,
        screen: (u32, u32),
    ) {
        let result = match action.kind {
            ActionType::Click => self.click(action, &region.rect, resolution, screen),
            ActionType::LongPress => self.long_press(action, &region.rect, resolution, screen),
            ActionType::Swipe => self.swipe(action, &region.rect, resolution, screen),
            ActionType::BackKey => self.dispatcher.press_back(),
            ActionType::Wait | ActionType::LaunchApp | ActionType::CheckExit => {
                log::debug!("{:?} on '{}' needs no gesture", action.kind, region.id);
                Ok(())
            }
        };

        if let Err(e) = result {
            log::error!("{:?} on region '{}' failed: {}", action.kind, region.id, e);
        }
    }

    /// Humanized tap point for a percentage rectangle
    pub fn target_point(
        &mut self,
        rect: &Rect,
        resolution: Option<Resolution>,
        screen: (u32, u32),
    ) -> GesturePoint {
        let target = Projection::new(screen.0, screen.1, resolution).rect(rect);
        let (cx, cy) = target.center();
        let (dx, dy) = if self.config.humanize_position {
            (
                self.humanizer.gaussian_offset(target.width),
                self.humanizer.gaussian_offset(target.height),
            )
        } else {
            (0.0, 0.0)
        };
        GesturePoint::new(cx + dx, cy + dy).clamped(screen)
    }

    fn click(
        &mut self,
        action: &ActionConfig,
        rect: &Rect,
        resolution: Option<Resolution>,
        screen: (u32, u32),
    ) -> Result<(), HostError> {
        let repeat = action.params.repeat.unwrap_or(1).max(1);
        let delay = action.params.repeat_delay.unwrap_or(self.config.repeat_delay_ms);
        let base = self.target_point(rect, resolution, screen);

        for i in 0..repeat {
            let mut point = base;
            if i > 0 {
                if !self.pacer.smart_sleep(&mut self.humanizer, delay, self.config.wait_variance(delay)) {
                    log::debug!("Click repeats interrupted by stop");
                    return Ok(());
                }
                // Finger micro-movement between repeated taps
                if self.config.humanize_position {
                    let max = self.config.repeat_perturbation_px;
                    point = GesturePoint::new(
                        point.x + self.humanizer.perturb(max),
                        point.y + self.humanizer.perturb(max),
                    )
                    .clamped(screen);
                }
            }
            let duration = self.tap_duration();
            self.dispatcher.dispatch(&[Stroke::tap(point, duration)])?;
        }
        Ok(())
    }

    fn long_press(
        &mut self,
        action: &ActionConfig,
        rect: &Rect,
        resolution: Option<Resolution>,
        screen: (u32, u32),
    ) -> Result<(), HostError> {
        let point = self.target_point(rect, resolution, screen);
        let duration = action.params.duration.unwrap_or(self.config.long_press_ms).max(1);
        self.dispatcher.dispatch(&[Stroke::tap(point, duration)])
    }

    fn swipe(
        &mut self,
        action: &ActionConfig,
        rect: &Rect,
        resolution: Option<Resolution>,
        screen: (u32, u32),
    ) -> Result<(), HostError> {
        let params = &action.params;
        let start = self.target_point(rect, resolution, screen);
        let direction = params.direction.unwrap_or_else(|| {
            log::warn!("Swipe without direction, defaulting to UP");
            SwipeDirection::Up
        });
        let distance = params
            .distance
            .unwrap_or_else(|| self.humanizer.range_f32(self.config.swipe_distance_px));
        let (vx, vy) = direction.vector();
        let end = GesturePoint::new(start.x + vx * distance, start.y + vy * distance).clamped(screen);

        let bend = self.humanizer.range_f32(self.config.swipe_bend) * self.humanizer.sign();
        let base_duration = params.duration.unwrap_or(self.config.swipe_duration_ms);
        let duration = if self.config.humanize_timing {
            self.humanizer.jitter_delay(base_duration, base_duration / 10)
        } else {
            base_duration
        };

        let strokes = SwipeCurve::new(start, end, bend).strokes(duration, self.config.segmented_swipe, screen);
        self.dispatcher.dispatch(&strokes)
    }

    fn tap_duration(&mut self) -> u64 {
        if self.config.humanize_timing {
            self.humanizer.range_u64(self.config.click_duration_ms)
        } else {
            self.config.click_duration_ms.0
        }
    }
}
