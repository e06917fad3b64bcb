//! Op buffer: stride-scoped result collection for async actions.
//!
//! The buffer owns its op slots by index; the handles an action receives
//! carry a back-index, never a pointer into the buffer, so completion
//! callbacks cannot form reference cycles. Async completions arrive in any
//! order; once the motor has sealed the stride and every op has settled,
//! the buffer dispatches results to its sink strictly in cycle order
//! (slots are appended in cycle order by the motor).
//!
//! Every completion also records `wait + service` nanoseconds into the
//! cycles timer, which keeps coordinated-omission accounting intact for
//! async actions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::metrics::Timer;
use crate::output::{Output, OutputError};

/// Result code recorded for ops dropped without an explicit stop.
pub const ABANDONED_RESULT: i32 = -1;

// ─── Buffer ─────────────────────────────────────────────────────────

/// Stride-scoped op collection with in-order dispatch on completion.
pub struct OpBuffer {
    shared: Arc<BufferShared>,
}

struct BufferShared {
    state: Mutex<BufferState>,
    settled_or_dispatched: Condvar,
    sink: Arc<dyn Output>,
    cycles_timer: Option<Arc<Timer>>,
    origin: Instant,
}

struct BufferState {
    slots: Vec<OpSlot>,
    settled: usize,
    sealed: bool,
    dispatched: bool,
    sink_error: Option<OutputError>,
}

#[derive(Debug, Clone, Copy)]
struct OpSlot {
    cycle: i64,
    wait_nanos: i64,
    /// Nanoseconds since buffer origin when the op was created.
    born_nanos: i64,
    outcome: SlotOutcome,
    response_nanos: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotOutcome {
    Pending,
    Stopped(i32),
    Abandoned,
}

impl OpBuffer {
    /// Buffer for up to `capacity` ops of one stride, dispatching into
    /// `sink` once sealed and fully settled.
    pub fn new(
        capacity: usize,
        sink: Arc<dyn Output>,
        cycles_timer: Option<Arc<Timer>>,
    ) -> Self {
        Self {
            shared: Arc::new(BufferShared {
                state: Mutex::new(BufferState {
                    slots: Vec::with_capacity(capacity),
                    settled: 0,
                    sealed: false,
                    dispatched: false,
                    sink_error: None,
                }),
                settled_or_dispatched: Condvar::new(),
                sink,
                cycles_timer,
                origin: Instant::now(),
            }),
        }
    }

    /// Allocate the next op slot. Ops must be created in cycle order;
    /// dispatch order is slot order.
    pub fn new_op(&self) -> OpHandle {
        let mut state = self.shared.state.lock();
        debug_assert!(!state.sealed, "op created after seal");
        let index = state.slots.len();
        state.slots.push(OpSlot {
            cycle: 0,
            wait_nanos: 0,
            born_nanos: self.shared.origin.elapsed().as_nanos() as i64,
            outcome: SlotOutcome::Pending,
            response_nanos: 0,
        });
        OpHandle {
            shared: Arc::clone(&self.shared),
            index,
            settled: false,
        }
    }

    /// Mark the stride complete: no more ops will be created. Triggers
    /// dispatch immediately if every op has already settled.
    pub fn seal(&self) {
        let mut state = self.shared.state.lock();
        state.sealed = true;
        if state.settled == state.slots.len() {
            self.shared.dispatch(&mut state);
        }
    }

    /// Ops created so far.
    pub fn len(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether results have been delivered to the sink.
    pub fn is_dispatched(&self) -> bool {
        self.shared.state.lock().dispatched
    }

    /// Block until the buffer dispatches (or is sealed empty), up to
    /// `timeout`. Returns false on timeout.
    pub fn await_dispatch(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.dispatched && !(state.sealed && state.slots.is_empty()) {
            if self
                .shared
                .settled_or_dispatched
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return false;
            }
        }
        true
    }

    /// Suppress delivery: late completions settle silently and the sink
    /// never sees this stride. Used when outstanding ops are abandoned at
    /// shutdown.
    pub fn disarm(&self) {
        let mut state = self.shared.state.lock();
        state.dispatched = true;
        self.shared.settled_or_dispatched.notify_all();
    }

    /// Take the sink error raised during dispatch, if any.
    pub fn take_sink_error(&self) -> Option<OutputError> {
        self.shared.state.lock().sink_error.take()
    }

    /// Final response time (wait + service) recorded for `cycle`, once
    /// its op has stopped.
    pub fn final_response_nanos(&self, cycle: i64) -> Option<i64> {
        let state = self.shared.state.lock();
        state
            .slots
            .iter()
            .find(|s| s.cycle == cycle && matches!(s.outcome, SlotOutcome::Stopped(_)))
            .map(|s| s.response_nanos)
    }
}

impl BufferShared {
    /// Deliver settled results to the sink in slot (= cycle) order.
    ///
    /// Called with the state lock held, exactly once per buffer.
    /// Abandoned slots are skipped: the sink sees only acknowledged ops.
    fn dispatch(&self, state: &mut BufferState) {
        if state.dispatched {
            return;
        }
        state.dispatched = true;
        for slot in &state.slots {
            if let SlotOutcome::Stopped(result) = slot.outcome {
                if let Err(e) = self.sink.on_cycle_result(slot.cycle, result) {
                    tracing::error!(cycle = slot.cycle, error = %e, "sink failed during op dispatch");
                    state.sink_error = Some(e);
                    break;
                }
            }
        }
        self.settled_or_dispatched.notify_all();
    }

    fn settle(&self, index: usize, outcome: SlotOutcome) {
        let mut state = self.state.lock();
        let born_nanos = {
            let slot = &mut state.slots[index];
            if slot.outcome != SlotOutcome::Pending {
                // Exactly-once is enforced by handle ownership; a second
                // settle can only come from handle misuse.
                tracing::error!(cycle = slot.cycle, "op settled twice; ignoring");
                return;
            }
            slot.outcome = outcome;
            slot.born_nanos
        };

        if let SlotOutcome::Stopped(_) = outcome {
            let service = self.origin.elapsed().as_nanos() as i64 - born_nanos;
            let slot = &mut state.slots[index];
            slot.response_nanos = slot.wait_nanos + service.max(0);
            if let Some(timer) = &self.cycles_timer {
                timer.record_nanos(slot.response_nanos);
            }
        }

        state.settled += 1;
        if state.sealed && state.settled == state.slots.len() {
            self.dispatch(&mut state);
        } else {
            self.settled_or_dispatched.notify_all();
        }
    }
}

// ─── Op Handle ──────────────────────────────────────────────────────

/// One op's handle, passed to an async action.
///
/// The handle is the op's completion capability: calling
/// [`stop`](Self::stop) consumes it, so each op completes exactly once by
/// construction. Dropping a handle without stopping it abandons the op
/// (logged; the sink never sees it).
pub struct OpHandle {
    shared: Arc<BufferShared>,
    index: usize,
    settled: bool,
}

impl OpHandle {
    /// Cycle this op executes.
    pub fn cycle(&self) -> i64 {
        self.shared.state.lock().slots[self.index].cycle
    }

    /// Set the cycle before enqueueing.
    pub fn set_cycle(&mut self, cycle: i64) {
        self.shared.state.lock().slots[self.index].cycle = cycle;
    }

    /// Record the scheduling delay this op already waited before enqueue.
    pub fn set_wait_nanos(&mut self, nanos: i64) {
        self.shared.state.lock().slots[self.index].wait_nanos = nanos.max(0);
    }

    /// Complete the op with `result`. Consumes the handle.
    pub fn stop(mut self, result: i32) {
        self.settled = true;
        self.shared.settle(self.index, SlotOutcome::Stopped(result));
    }

    /// Discard the op without a result; the sink will not see it.
    pub fn abandon(mut self) {
        self.settled = true;
        self.shared.settle(self.index, SlotOutcome::Abandoned);
    }
}

impl Drop for OpHandle {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(index = self.index, "op handle dropped without stop; abandoning");
            self.shared.settle(self.index, SlotOutcome::Abandoned);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
