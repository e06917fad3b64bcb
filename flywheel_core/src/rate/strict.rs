//! Strict rate limiter: isochronous pacing, injectable clock.
//!
//! A specialization of the ticks-timeline engine with strictness pinned to
//! 1.0 at construction, so every scheduling gap is closed whole and no
//! burst credit accumulates. It exists as a distinct type so the schedule
//! can be driven by a [`ManualClock`](crate::clock::ManualClock) in tests;
//! the contract is otherwise identical to the average limiter.

use flywheel_common::error::ConfigError;
use flywheel_common::rate_spec::RateSpec;

use crate::clock::{Clock, MonotonicClock};
use crate::rate::limiter::{RateLimiter, TicksTimeline};

/// Isochronous rate limiter, generic over its time source.
pub struct StrictRateLimiter<C: Clock = MonotonicClock> {
    label: String,
    timeline: TicksTimeline<C>,
}

impl StrictRateLimiter<MonotonicClock> {
    /// Strict limiter at `ops_per_sec` over the monotonic clock.
    pub fn new(label: impl Into<String>, ops_per_sec: f64) -> Result<Self, ConfigError> {
        Self::with_clock(label, ops_per_sec, MonotonicClock::new())
    }
}

impl<C: Clock> StrictRateLimiter<C> {
    /// Strict limiter at `ops_per_sec` over a caller-supplied clock.
    pub fn with_clock(
        label: impl Into<String>,
        ops_per_sec: f64,
        clock: C,
    ) -> Result<Self, ConfigError> {
        let spec = RateSpec::new(ops_per_sec).with_strictness(1.0);
        let timeline = TicksTimeline::new(spec, clock)?;
        Ok(Self {
            label: label.into(),
            timeline,
        })
    }

    /// Label used in logs.
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Relax or restore strictness in place.
    ///
    /// Accepts values in `[0, 1]`; anything else is rejected with a
    /// configuration error. Accumulated delay is preserved.
    pub fn set_strictness(&self, strictness: f64) -> Result<(), ConfigError> {
        if !strictness.is_finite() || !(0.0..=1.0).contains(&strictness) {
            return Err(ConfigError::InvalidStrictness(strictness));
        }
        let spec = self.timeline.spec().with_strictness(strictness);
        self.timeline.update(spec)
    }
}

impl<C: Clock> RateLimiter for StrictRateLimiter<C> {
    fn start(&self) {
        self.timeline.start();
    }

    fn acquire(&self) -> i64 {
        self.timeline.acquire_op()
    }

    fn acquire_nanos(&self, nanos: i64) -> i64 {
        self.timeline.acquire_nanos(nanos)
    }

    fn update(&self, spec: RateSpec) -> Result<(), ConfigError> {
        self.timeline.update(spec)
    }

    fn rate(&self) -> f64 {
        self.timeline.spec().ops_per_sec
    }

    fn strictness(&self) -> f64 {
        self.timeline.spec().strictness
    }

    fn total_scheduling_delay(&self) -> i64 {
        self.timeline.total_scheduling_delay()
    }

    fn rate_scheduling_delay(&self) -> i64 {
        self.timeline.rate_scheduling_delay()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn strict_at_1khz() -> (StrictRateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = StrictRateLimiter::with_clock("test", 1000.0, clock.clone()).unwrap();
        limiter.start();
        (limiter, clock)
    }

    #[test]
    fn grants_are_isochronous() {
        let (limiter, clock) = strict_at_1khz();
        for i in 1..=5 {
            limiter.acquire();
            // Each grant lands exactly one period after the previous one.
            assert_eq!(clock.now_nanos(), (i - 1) * 1_000_000);
        }
    }

    #[test]
    fn no_burst_after_idle() {
        let (limiter, clock) = strict_at_1khz();
        limiter.acquire();
        clock.advance(50_000_000);
        // The idle gap is closed whole; the next two grants are paced
        // one period apart from the current clock, not rushed through.
        limiter.acquire();
        let t1 = clock.now_nanos();
        limiter.acquire();
        assert_eq!(clock.now_nanos() - t1, 1_000_000);
    }

    #[test]
    fn set_strictness_bounds() {
        let (limiter, _clock) = strict_at_1khz();
        assert!(limiter.set_strictness(0.0).is_ok());
        assert!(limiter.set_strictness(1.0).is_ok());
        assert!(limiter.set_strictness(1.5).is_err());
        assert!(limiter.set_strictness(-0.1).is_err());
        assert!(limiter.set_strictness(f64::NAN).is_err());
        // Last accepted value is in effect.
        assert_eq!(limiter.strictness(), 1.0);
    }

    #[test]
    fn stride_sized_allowances() {
        let (limiter, clock) = strict_at_1khz();
        // A 10-op allowance advances the schedule by ten periods at once.
        limiter.acquire_nanos(10_000_000);
        limiter.acquire();
        assert_eq!(clock.now_nanos(), 10_000_000);
    }
}
