//! Shared constants for the Flywheel workspace.

use static_assertions::const_assert;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Upper bound on configurable rates [ops/s]. One grant per nanosecond is
/// the precision floor of the ticks timeline.
pub const MAX_OPS_PER_SEC: f64 = 1e9;

/// Default cycles per segment acquisition when `stride` is not configured.
pub const DEFAULT_STRIDE: usize = 1;

/// Token filler refill interval [ms].
pub const FILLER_INTERVAL_MS: u64 = 1;

/// How long an async motor waits for outstanding ops at shutdown [ms].
pub const COMPLETION_TIMEOUT_MS: i64 = 60_000;

/// Sentinel returned by a cycle segment once it is drained.
///
/// Cycle numbers are non-negative within a run, so any negative value is
/// unambiguous; consumers must treat every negative return as exhaustion.
pub const CYCLE_EXHAUSTED: i64 = -1;

const_assert!(MAX_OPS_PER_SEC <= NANOS_PER_SEC as f64);
const_assert!(CYCLE_EXHAUSTED < 0);
