//! Output contract: where completed cycle results go.

use parking_lot::Mutex;

use crate::segment::CycleResultSegment;

/// Error raised by a result sink. Motors treat it as fatal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct OutputError(pub String);

impl OutputError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Sink for completed cycle results.
///
/// Implementations must be thread-safe: every motor of an activity shares
/// one sink, and async completions arrive from action threads.
pub trait Output: Send + Sync {
    /// Consume one `(cycle, result)` pair.
    fn on_cycle_result(&self, cycle: i64, result: i32) -> Result<(), OutputError>;

    /// Consume a contiguous batch; the default loops over the pairs.
    fn on_result_segment(&self, segment: &CycleResultSegment) -> Result<(), OutputError> {
        for (cycle, result) in segment.iter() {
            self.on_cycle_result(cycle, result as i32)?;
        }
        Ok(())
    }
}

// ─── Collecting Output ──────────────────────────────────────────────

/// Sink that retains every result, for tests and draining consumers.
#[derive(Debug, Default)]
pub struct VecOutput {
    results: Mutex<Vec<(i64, i32)>>,
}

impl VecOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of results received so far.
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Take the collected `(cycle, result)` pairs, leaving the sink empty.
    pub fn take(&self) -> Vec<(i64, i32)> {
        std::mem::take(&mut self.results.lock())
    }
}

impl Output for VecOutput {
    fn on_cycle_result(&self, cycle: i64, result: i32) -> Result<(), OutputError> {
        self.results.lock().push((cycle, result));
        Ok(())
    }
}

/// Sink that discards everything; useful for benches.
#[derive(Debug, Default)]
pub struct NullOutput;

impl Output for NullOutput {
    fn on_cycle_result(&self, _cycle: i64, _result: i32) -> Result<(), OutputError> {
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
