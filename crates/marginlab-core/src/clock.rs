//! Time source for every wait in the engine.
//!
//! Calibration settles, poll sleeps and stabilization delays all go through
//! [`Clock`], so the same loops run against wall time in production and
//! against virtual time on the simulated bench.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub trait Clock: Send + Sync {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;

    /// Block for `d`.
    fn sleep(&self, d: Duration);
}

/// Monotonic wall clock.
pub struct SystemClock {
    origin: quanta::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: quanta::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}

/// Virtual clock: `sleep` advances time instantly.
///
/// Clones share the same timeline, so a simulated device holding a clone
/// sees exactly the time the evaluator has slept through.
#[derive(Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        let step = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(step, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// Sleep for up to `d`, never past `deadline`.
pub fn sleep_capped(clock: &dyn Clock, d: Duration, deadline: Duration) {
    let remaining = deadline.saturating_sub(clock.now());
    let wait = d.min(remaining);
    if !wait.is_zero() {
        clock.sleep(wait);
    }
}
