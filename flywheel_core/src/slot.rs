//! Slot state tracker: the per-worker lifecycle state machine.
//!
//! Each motor exclusively owns its slot cell and drives the transitions;
//! external code may read the state at any time and may request a stop,
//! which is the only externally triggered transition besides the
//! input-exhaustion path the motor itself takes.
//!
//! ```text
//! Initialized → Starting → Running → Stopping → Stopped
//!                               ↘ Finished (input exhausted) → Stopped
//!                               ↘ Errored  (on fatal)
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

use static_assertions::const_assert_eq;

// ─── Slot State ─────────────────────────────────────────────────────

/// Lifecycle state of one motor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Slot exists, motor not yet started.
    Initialized = 0,
    /// Motor thread is initializing its action and inputs.
    Starting = 1,
    /// Main loop is dispatching cycles.
    Running = 2,
    /// Stop requested; motor exits at the next safe point.
    Stopping = 3,
    /// Terminal: motor exited cleanly.
    Stopped = 4,
    /// Input exhausted; async drain may still be in progress.
    Finished = 5,
    /// Terminal: motor exited on a fatal action/output fault.
    Errored = 6,
}

const_assert_eq!(core::mem::size_of::<SlotState>(), 1);

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initialized,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Stopped,
            5 => Self::Finished,
            _ => Self::Errored,
        }
    }

    /// Whether the FSM permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Initialized, Starting)
                | (Starting, Running)
                | (Starting, Errored)
                | (Running, Stopping)
                | (Running, Finished)
                | (Running, Errored)
                | (Stopping, Stopped)
                | (Stopping, Errored)
                | (Finished, Stopped)
                | (Finished, Errored)
        )
    }

    /// Terminal states never transition again.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, SlotState::Stopped | SlotState::Errored)
    }
}

/// Rejected slot transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid slot transition {from:?} → {to:?}")]
pub struct InvalidTransition {
    pub from: SlotState,
    pub to: SlotState,
}

// ─── Slot State Tracker ─────────────────────────────────────────────

/// Atomic slot cell enforcing the transition table via compare-and-swap.
#[derive(Debug)]
pub struct SlotStateTracker {
    slot: usize,
    state: AtomicU8,
}

impl SlotStateTracker {
    /// New tracker in `Initialized`.
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            state: AtomicU8::new(SlotState::Initialized as u8),
        }
    }

    /// Slot index this cell belongs to.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Current state.
    #[inline]
    pub fn current(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Convenience check used on the motor hot path.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.current() == SlotState::Running
    }

    /// Attempt the transition to `next`, enforcing the table atomically.
    pub fn transition_to(&self, next: SlotState) -> Result<SlotState, InvalidTransition> {
        loop {
            let current = self.current();
            if !current.can_transition_to(next) {
                return Err(InvalidTransition {
                    from: current,
                    to: next,
                });
            }
            if self
                .state
                .compare_exchange(
                    current as u8,
                    next as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                tracing::debug!(slot = self.slot, from = ?current, to = ?next, "slot transition");
                return Ok(next);
            }
            // Lost a race; re-evaluate against the new state.
        }
    }

    /// Request a cooperative stop.
    ///
    /// Valid only from `Running`; from any other state this is a no-op
    /// with a logged warning. Returns whether the request took effect.
    pub fn request_stop(&self) -> bool {
        match self.transition_to(SlotState::Stopping) {
            Ok(_) => true,
            Err(rejected) => {
                tracing::warn!(
                    slot = self.slot,
                    state = ?rejected.from,
                    "stop requested outside Running; ignored"
                );
                false
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
