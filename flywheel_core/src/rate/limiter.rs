//! Rate limiter contract and the shared ticks-timeline engine.
//!
//! The timeline is a monotonic accumulator of granted nanoseconds. A
//! fetch-add on it linearizes concurrent acquisitions: the i-th grant
//! receives the disjoint window `[T₀ + i·op_ticks, T₀ + (i+1)·op_ticks)`
//! regardless of which thread claimed it. Callers arriving early sleep
//! until their window opens; callers arriving late optionally close part
//! of the accumulated gap, which is what turns the strictness knob into
//! a blend of isochronous and bursty pacing.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use flywheel_common::error::ConfigError;
use flywheel_common::rate_spec::RateSpec;

use crate::clock::Clock;

// ─── Contract ───────────────────────────────────────────────────────

/// Blocking rate limiter shared by all motors of an activity.
pub trait RateLimiter: Send + Sync {
    /// Set the clock origin of the schedule. Idempotent.
    fn start(&self);

    /// Block until the next grant is due.
    ///
    /// Returns the coordinated-omission delay in nanoseconds when the
    /// active spec asks for delay reporting, 0 otherwise.
    fn acquire(&self) -> i64;

    /// Like [`acquire`](Self::acquire) but claiming a caller-specified
    /// nanosecond budget, e.g. a stride-sized allowance.
    fn acquire_nanos(&self, nanos: i64) -> i64;

    /// Reconfigure in place. Accumulated scheduling delay is preserved
    /// across the change.
    fn update(&self, spec: RateSpec) -> Result<(), ConfigError>;

    /// Target rate [ops/s] of the active spec.
    fn rate(&self) -> f64;

    /// Strictness of the active spec.
    fn strictness(&self) -> f64;

    /// Backlog checkpointed across reconfigurations plus the current
    /// timeline lag [ns].
    fn total_scheduling_delay(&self) -> i64;

    /// Current lag of the timeline behind the wall clock [ns].
    fn rate_scheduling_delay(&self) -> i64;
}

// ─── Ticks Timeline ─────────────────────────────────────────────────

/// Shared engine behind the average and strict limiters.
///
/// `acquire` touches only the padded atomics; `update` serializes behind
/// the spec mutex and never stalls acquirers.
pub(crate) struct TicksTimeline<C: Clock> {
    clock: C,
    /// Authoritative schedule: the earliest nanosecond at which the next
    /// grant becomes due. Never decreases.
    ticks: CachePadded<AtomicI64>,
    /// Wall-clock value cached by the most recent grant that read the
    /// clock. Lets grants already behind schedule skip the clock read.
    last_seen: CachePadded<AtomicI64>,
    /// Delay carried over from before the most recent reconfiguration [ns].
    carried_delay: CachePadded<AtomicI64>,
    /// Nanoseconds per grant.
    op_ticks: AtomicI64,
    /// Right-shift applied when closing scheduling gaps.
    burst_shift: AtomicU32,
    report_co_delay: AtomicBool,
    started: AtomicBool,
    /// Active spec; taken by `update` only.
    spec: Mutex<RateSpec>,
}

impl<C: Clock> TicksTimeline<C> {
    pub(crate) fn new(spec: RateSpec, clock: C) -> Result<Self, ConfigError> {
        spec.validate()?;
        let now = clock.now_nanos();
        let timeline = Self {
            clock,
            ticks: CachePadded::new(AtomicI64::new(now)),
            last_seen: CachePadded::new(AtomicI64::new(now)),
            carried_delay: CachePadded::new(AtomicI64::new(0)),
            op_ticks: AtomicI64::new(spec.op_ticks()),
            burst_shift: AtomicU32::new(spec.burst_shift()),
            report_co_delay: AtomicBool::new(spec.report_co_delay),
            started: AtomicBool::new(false),
            spec: Mutex::new(spec),
        };
        Ok(timeline)
    }

    pub(crate) fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            let now = self.clock.now_nanos();
            self.ticks.store(now, Ordering::Relaxed);
            self.last_seen.store(now, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn acquire_op(&self) -> i64 {
        self.acquire_nanos(self.op_ticks.load(Ordering::Relaxed))
    }

    pub(crate) fn acquire_nanos(&self, nanos: i64) -> i64 {
        // Claim a disjoint window on the schedule. The pre-value is this
        // grant's due time.
        let sched = self.ticks.fetch_add(nanos, Ordering::Relaxed);

        let seen = self.last_seen.load(Ordering::Relaxed);
        if sched < seen {
            // The timeline is behind a wall-clock reading some other grant
            // already took: this grant is due immediately.
            return self.reported_delay(seen - sched);
        }

        let now = self.clock.now_nanos();
        self.last_seen.store(now, Ordering::Relaxed);

        let gap = now - sched;
        if gap > 0 {
            // Late caller. Close part of the unused scheduling budget; the
            // remainder stays on the timeline as burst credit.
            let close = gap >> self.burst_shift.load(Ordering::Relaxed);
            if close > 0 {
                self.ticks.fetch_add(close, Ordering::Relaxed);
            }
            self.reported_delay(gap)
        } else {
            // Early caller: sleep until the window opens. Wakeups are
            // re-checked against the clock, so a spurious or short wake
            // just goes back to sleep.
            let mut current = now;
            while current < sched {
                self.clock.sleep_nanos(sched - current);
                current = self.clock.now_nanos();
            }
            0
        }
    }

    pub(crate) fn update(&self, new_spec: RateSpec) -> Result<(), ConfigError> {
        new_spec.validate()?;
        let mut spec = self.spec.lock();
        if *spec == new_spec {
            return Ok(());
        }

        // Checkpoint the current backlog so total delay survives the
        // timeline reset.
        let now = self.clock.now_nanos();
        let backlog = (now - self.ticks.load(Ordering::Relaxed)).max(0);
        self.carried_delay.fetch_add(backlog, Ordering::Relaxed);

        self.op_ticks.store(new_spec.op_ticks(), Ordering::Relaxed);
        self.burst_shift.store(new_spec.burst_shift(), Ordering::Relaxed);
        self.report_co_delay
            .store(new_spec.report_co_delay, Ordering::Relaxed);
        self.ticks.store(now, Ordering::Relaxed);
        self.last_seen.store(now, Ordering::Relaxed);

        tracing::debug!(
            ops_per_sec = new_spec.ops_per_sec,
            strictness = new_spec.strictness,
            carried_delay_ns = self.carried_delay.load(Ordering::Relaxed),
            "rate limiter reconfigured"
        );
        *spec = new_spec;
        Ok(())
    }

    pub(crate) fn spec(&self) -> RateSpec {
        *self.spec.lock()
    }

    pub(crate) fn total_scheduling_delay(&self) -> i64 {
        self.carried_delay.load(Ordering::Relaxed) + self.rate_scheduling_delay()
    }

    pub(crate) fn rate_scheduling_delay(&self) -> i64 {
        (self.clock.now_nanos() - self.ticks.load(Ordering::Relaxed)).max(0)
    }

    #[inline]
    fn reported_delay(&self, current: i64) -> i64 {
        if self.report_co_delay.load(Ordering::Relaxed) {
            current + self.carried_delay.load(Ordering::Relaxed)
        } else {
            0
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
