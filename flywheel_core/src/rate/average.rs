//! Average rate limiter: nano-ticks accumulator with gap-closing bursts.
//!
//! The workhorse limiter for `cyclerate`/`striderate`/`phaserate`. With
//! strictness below 1.0 it lets callers spend scheduling budget that went
//! unused while they were slow (coordinated-omission absorption); with
//! strictness 1.0 it behaves isochronously.

use flywheel_common::error::ConfigError;
use flywheel_common::rate_spec::RateSpec;

use crate::clock::MonotonicClock;
use crate::rate::limiter::{RateLimiter, TicksTimeline};

/// Shared, lock-free-on-acquire rate limiter over the monotonic clock.
pub struct AverageRateLimiter {
    label: String,
    timeline: TicksTimeline<MonotonicClock>,
}

impl AverageRateLimiter {
    /// Build a limiter for `spec`. The label names the limiter in logs
    /// (typically `<alias>.<ratekind>`).
    pub fn new(label: impl Into<String>, spec: RateSpec) -> Result<Self, ConfigError> {
        let label = label.into();
        let timeline = TicksTimeline::new(spec, MonotonicClock::new())?;
        tracing::debug!(
            limiter = %label,
            ops_per_sec = spec.ops_per_sec,
            strictness = spec.strictness,
            "average rate limiter created"
        );
        Ok(Self { label, timeline })
    }

    /// Label used in logs.
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The active spec.
    pub fn spec(&self) -> RateSpec {
        self.timeline.spec()
    }
}

impl RateLimiter for AverageRateLimiter {
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
