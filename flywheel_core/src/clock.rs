//! Nanosecond clock seam.
//!
//! Rate limiters read time through the [`Clock`] trait so that the strict
//! limiter's schedule can be driven by a manual clock in tests while
//! production code runs on the monotonic OS clock. Sleeping also goes
//! through the trait: a manual clock "sleeps" by advancing itself, which
//! keeps blocking acquisition paths deterministic under test.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic nanosecond time source used by the rate limiters.
pub trait Clock: Send + Sync + 'static {
    /// Nanoseconds since this clock's origin. Never decreases.
    fn now_nanos(&self) -> i64;

    /// Block the caller for approximately `nanos` nanoseconds.
    ///
    /// Callers re-check `now_nanos` after waking; implementations may
    /// return early.
    fn sleep_nanos(&self, nanos: i64);
}

// ─── Monotonic Clock ────────────────────────────────────────────────

/// Wall-clock implementation over [`Instant`], origin at construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_nanos(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    fn sleep_nanos(&self, nanos: i64) {
        if nanos > 0 {
            std::thread::sleep(Duration::from_nanos(nanos as u64));
        }
    }
}

// ─── Manual Clock ───────────────────────────────────────────────────

/// Hand-driven clock for deterministic schedule tests.
///
/// Cloning yields a handle onto the same timeline, so a test can hold one
/// handle while the limiter under test owns another. `sleep_nanos` advances
/// the clock instead of blocking, which lets blocking acquisition paths run
/// to completion without real waiting.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `nanos`.
    pub fn advance(&self, nanos: i64) {
        self.now.fetch_add(nanos.max(0), Ordering::SeqCst);
    }

    /// Jump the clock to an absolute nanosecond, never backwards.
    pub fn set_at_least(&self, nanos: i64) {
        self.now.fetch_max(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_nanos(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_nanos(&self, nanos: i64) {
        self.advance(nanos);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
