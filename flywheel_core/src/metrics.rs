//! Metrics glue: timers and gauges behind an explicitly threaded registry.
//!
//! The registry is a cloneable handle, not a process-wide singleton;
//! whoever assembles an activity creates one and threads it through. Timer
//! histograms are HDR histograms in nanoseconds, so percentile queries stay
//! meaningful from sub-microsecond action costs up to multi-second stalls.
//!
//! Metric names consumed by downstream dashboards are fixed: the timers
//! `cycles`, `phases`, `strides`, `read_input` and the gauge
//! `cco-delay-<label>`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;

// ─── Timer ──────────────────────────────────────────────────────────

/// Thread-safe latency timer recording nanoseconds into an HDR histogram.
pub struct Timer {
    hist: Mutex<Histogram<u64>>,
}

impl Timer {
    fn new() -> Self {
        // Three significant figures is always within histogram bounds.
        let hist = Histogram::new(3).expect("sigfigs in range");
        Self {
            hist: Mutex::new(hist),
        }
    }

    /// Record a nanosecond value. Negative values are clamped to zero.
    pub fn record_nanos(&self, nanos: i64) {
        self.hist.lock().saturating_record(nanos.max(0) as u64);
    }

    /// Record a duration.
    pub fn record(&self, duration: Duration) {
        self.record_nanos(duration.as_nanos() as i64);
    }

    /// Record elapsed time since `start` plus an extra scheduling delay.
    pub fn record_since(&self, start: Instant, extra_delay_nanos: i64) {
        self.record_nanos(start.elapsed().as_nanos() as i64 + extra_delay_nanos.max(0));
    }

    /// Number of recorded values.
    pub fn count(&self) -> u64 {
        self.hist.lock().len()
    }

    /// Point-in-time summary of the recorded distribution.
    pub fn snapshot(&self) -> TimerSnapshot {
        let hist = self.hist.lock();
        TimerSnapshot {
            count: hist.len(),
            mean_nanos: hist.mean(),
            p50_nanos: hist.value_at_quantile(0.50),
            p95_nanos: hist.value_at_quantile(0.95),
            p99_nanos: hist.value_at_quantile(0.99),
            max_nanos: hist.max(),
        }
    }
}

/// Summary of a [`Timer`] distribution, all values in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerSnapshot {
    pub count: u64,
    pub mean_nanos: f64,
    pub p50_nanos: u64,
    pub p95_nanos: u64,
    pub p99_nanos: u64,
    pub max_nanos: u64,
}

// ─── Gauge ──────────────────────────────────────────────────────────

/// Last-value gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ─── Registry ───────────────────────────────────────────────────────

/// Cloneable handle onto a set of named timers and gauges.
///
/// `timer`/`gauge` get-or-create, so any number of components can share an
/// instrument by name.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    timers: BTreeMap<String, Arc<Timer>>,
    gauges: BTreeMap<String, Arc<Gauge>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The timer registered under `name`, created on first use.
    pub fn timer(&self, name: &str) -> Arc<Timer> {
        let mut inner = self.inner.lock();
        Arc::clone(
            inner
                .timers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Timer::new())),
        )
    }

    /// The gauge registered under `name`, created on first use.
    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        let mut inner = self.inner.lock();
        Arc::clone(
            inner
                .gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Gauge::default())),
        )
    }

    /// Registered timer names, sorted.
    pub fn timer_names(&self) -> Vec<String> {
        self.inner.lock().timers.keys().cloned().collect()
    }

    /// Registered gauge names, sorted.
    pub fn gauge_names(&self) -> Vec<String> {
        self.inner.lock().gauges.keys().cloned().collect()
    }
}

// ─── Activity Metrics ───────────────────────────────────────────────

/// The instrument bundle every motor records into.
#[derive(Clone)]
pub struct ActivityMetrics {
    /// Whole-cycle service time plus cycle scheduling delay.
    pub cycles: Arc<Timer>,
    /// Per-phase service time plus phase scheduling delay.
    pub phases: Arc<Timer>,
    /// Whole-stride service time plus stride scheduling delay.
    pub strides: Arc<Timer>,
    /// Input segment acquisition time.
    pub read_input: Arc<Timer>,
    /// Cumulative coordinated-omission delay of the cycle limiter.
    pub co_delay: Arc<Gauge>,
}

impl ActivityMetrics {
    /// Register the activity's instruments under their fixed names.
    pub fn new(registry: &MetricsRegistry, label: &str) -> Self {
        Self {
            cycles: registry.timer("cycles"),
            phases: registry.timer("phases"),
            strides: registry.timer("strides"),
            read_input: registry.timer("read_input"),
            co_delay: registry.gauge(&format!("cco-delay-{label}")),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
