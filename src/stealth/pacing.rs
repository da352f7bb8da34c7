//! Clock and interruptible sleep
//!
//! All pacing in the engine goes through a [`Clock`] so tests can simulate
//! elapsed time, and every sleep is split into chunks that poll the stop
//! flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveTime};

use super::humanize::Humanizer;

/// Time source used by the engine
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since an arbitrary origin
    fn now_ms(&self) -> u64;

    /// Local wall-clock time of day
    fn time_of_day(&self) -> NaiveTime;

    /// Sleep `ms` in chunks of at most `chunk_ms`, returning early (false)
    /// as soon as `stop` is raised
    fn sleep_ms(&self, ms: u64, chunk_ms: u64, stop: &AtomicBool) -> bool;
}

/// Real time
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn time_of_day(&self) -> NaiveTime {
        Local::now().time()
    }

    fn sleep_ms(&self, ms: u64, chunk_ms: u64, stop: &AtomicBool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(ms);
        let chunk = Duration::from_millis(chunk_ms.max(1));
        loop {
            if stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(chunk.min(deadline - now));
        }
    }
}

/// Simulated time (for testing). Sleeping advances the clock instantly.
pub struct ManualClock {
    now: AtomicU64,
    slept: AtomicU64,
    time_of_day: Mutex<NaiveTime>,
}

impl ManualClock {
    /// Create a clock at t=0 and noon
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            slept: AtomicU64::new(0),
            time_of_day: Mutex::new(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)),
        }
    }

    /// Move time forward
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the reported time of day
    pub fn set_time_of_day(&self, time: NaiveTime) {
        if let Ok(mut t) = self.time_of_day.lock() {
            *t = time;
        }
    }

    /// Total time spent in `sleep_ms`
    pub fn total_slept(&self) -> u64 {
        self.slept.load(Ordering::SeqCst)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn time_of_day(&self) -> NaiveTime {
        self.time_of_day
            .lock()
            .map(|t| *t)
            .unwrap_or(NaiveTime::MIN)
    }

    fn sleep_ms(&self, ms: u64, _chunk_ms: u64, stop: &AtomicBool) -> bool {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        self.advance(ms);
        self.slept.fetch_add(ms, Ordering::SeqCst);
        true
    }
}

/// Stop-aware pacing shared by the engine and the action layer
#[derive(Clone)]
pub struct Pacer {
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    chunk_ms: u64,
}

impl Pacer {
    /// Create a pacer
    pub fn new(clock: Arc<dyn Clock>, stop: Arc<AtomicBool>, chunk_ms: u64) -> Self {
        Self {
            clock,
            stop,
            chunk_ms,
        }
    }

    /// Current clock time (ms)
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Current local time of day
    pub fn time_of_day(&self) -> NaiveTime {
        self.clock.time_of_day()
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleep exactly `ms`; false if interrupted
    pub fn sleep(&self, ms: u64) -> bool {
        if ms == 0 {
            return !self.is_stopped();
        }
        self.clock.sleep_ms(ms, self.chunk_ms, &self.stop)
    }

    /// Sleep `base ± N(0, variance / 3)` ms (floor 10ms); false if interrupted
    pub fn smart_sleep(&self, humanizer: &mut Humanizer, base_ms: u64, variance_ms: u64) -> bool {
        let ms = humanizer.jitter_delay(base_ms, variance_ms);
        self.sleep(ms)
    }
}
