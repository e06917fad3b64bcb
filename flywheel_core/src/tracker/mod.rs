//! Progress tracking: per-cycle result marking with ordered delivery.
//!
//! - [`extent::TrackerExtent`] — result bytes for one fixed sub-range.
//! - [`core::CoreTracker`] — the ring of extents with backpressure in
//!   both directions and strictly ordered, exactly-once delivery.
//! - [`TrackingOutput`] — output adapter that marks motor results into a
//!   tracker, so a downstream consumer can drain them in cycle order.

pub mod core;
pub mod extent;

use std::sync::Arc;

use crate::output::{Output, OutputError};
pub use self::core::CoreTracker;
pub use self::extent::TrackerExtent;

// ─── Errors ─────────────────────────────────────────────────────────

/// Error raised by tracker marking.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Cycle outside the tracked (or extent) range.
    #[error("cycle {cycle} outside tracked range [{min}, {max})")]
    CycleOutOfBounds {
        cycle: i64,
        min: i64,
        max: i64,
    },

    /// Each cycle carries exactly one result.
    #[error("cycle {0} already marked")]
    AlreadyMarked(i64),

    /// The consumer has already drained past this cycle.
    #[error("cycle {0} already retired by the consumer")]
    CycleRetired(i64),
}

// ─── Tracking Output ────────────────────────────────────────────────

/// Output sink that marks every result into a [`CoreTracker`].
///
/// Wire this behind a motor and drain the tracker from a consumer thread
/// to turn completion-order results into cycle-order results.
pub struct TrackingOutput {
    tracker: Arc<CoreTracker>,
}

impl TrackingOutput {
    pub fn new(tracker: Arc<CoreTracker>) -> Self {
        Self { tracker }
    }

    /// The tracker behind this sink.
    pub fn tracker(&self) -> &Arc<CoreTracker> {
        &self.tracker
    }
}

impl Output for TrackingOutput {
    fn on_cycle_result(&self, cycle: i64, result: i32) -> Result<(), OutputError> {
        self.tracker
            .mark_result(cycle, result)
            .map_err(|e| OutputError(e.to_string()))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
