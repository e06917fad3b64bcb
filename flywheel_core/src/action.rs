//! Action contracts: the user-defined work a motor drives.
//!
//! An action is either synchronous (the motor blocks through each cycle)
//! or asynchronous (the motor enqueues op contexts and the action
//! completes them on its own threads). Optional capabilities — multi-phase
//! execution for sync actions — are default trait methods, so plain
//! actions implement exactly one function.

use crate::opbuffer::OpHandle;

/// Error raised by user action code. The motor attaches the failing
/// cycle number and treats it as fatal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

// ─── Sync Actions ───────────────────────────────────────────────────

/// Synchronous action: processes one cycle per call.
pub trait SyncAction: Send {
    /// One-time setup before the motor enters its loop.
    fn init(&mut self) -> Result<(), ActionError> {
        Ok(())
    }

    /// Process `cycle`, returning its result code (0 = success, >0 =
    /// user-defined failure class).
    fn run_cycle(&mut self, cycle: i64) -> Result<i32, ActionError>;

    /// Multi-phase capability marker. When true, the motor runs
    /// [`run_phase`](Self::run_phase) after `run_cycle` until
    /// [`incomplete`](Self::incomplete) turns false.
    fn has_phases(&self) -> bool {
        false
    }

    /// Process one additional phase of `cycle`.
    fn run_phase(&mut self, cycle: i64) -> Result<i32, ActionError> {
        let _ = cycle;
        Ok(0)
    }

    /// Whether more phases remain for the current cycle.
    fn incomplete(&self) -> bool {
        false
    }
}

// ─── Async Actions ──────────────────────────────────────────────────

/// Asynchronous action: accepts op contexts and completes each one
/// exactly once, in any order, on its own threads.
pub trait AsyncAction: Send {
    /// One-time setup before the motor enters its loop.
    fn init(&mut self) -> Result<(), ActionError> {
        Ok(())
    }

    /// Accept `op` for execution.
    ///
    /// Returns `Err(op)` when the internal queue is full; the motor backs
    /// off and retries with the returned handle. An accepted op must see
    /// exactly one [`OpHandle::stop`] call.
    fn enqueue(&mut self, op: OpHandle) -> Result<(), OpHandle>;

    /// Block until every accepted op has completed, up to `timeout_ms`.
    /// Returns false on timeout, in which case outstanding ops are
    /// abandoned by the caller.
    fn await_completion(&mut self, timeout_ms: i64) -> bool;
}

// ─── Action Sum Type ────────────────────────────────────────────────

/// A dispensed action, ready to be owned by one motor.
pub enum Action {
    Sync(Box<dyn SyncAction>),
    Async(Box<dyn AsyncAction>),
}

impl Action {
    /// Whether this is the async variant.
    #[inline]
    pub fn is_async(&self) -> bool {
        matches!(self, Action::Async(_))
    }
}

/// Per-slot action factory, shared by the motor pool.
///
/// Explicit registration replaces any dynamic discovery: whoever
/// assembles an activity hands the pool a dispenser.
pub trait ActionDispenser: Send + Sync {
    fn dispense(&self, slot: usize) -> Action;
}

impl<F> ActionDispenser for F
where
    F: Fn(usize) -> Action + Send + Sync,
{
    fn dispense(&self, slot: usize) -> Action {
        self(slot)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl SyncAction for Doubler {
        fn run_cycle(&mut self, cycle: i64) -> Result<i32, ActionError> {
            Ok((cycle * 2) as i32)
        }
    }

    #[test]
    fn default_capabilities_are_off() {
        let mut action = Doubler;
        assert!(action.init().is_ok());
        assert!(!action.has_phases());
        assert!(!action.incomplete());
        assert_eq!(action.run_cycle(21).unwrap(), 42);
    }

    #[test]
    fn closures_are_dispensers() {
        let dispenser = |_slot: usize| Action::Sync(Box::new(Doubler));
        let action = dispenser.dispense(0);
        assert!(!action.is_async());
    }
}
