//! Motor: the per-slot worker loop.
//!
//! A motor pulls cycle segments from the shared input, throttles through
//! the activity's rate limiters, drives its action through every cycle
//! (directly for sync actions, via op contexts for async ones), and pushes
//! results to the output. It polls its slot state at every loop boundary,
//! so a requested stop takes effect within one cycle in sync mode and
//! within the action's queue depth in async mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use flywheel_common::consts::COMPLETION_TIMEOUT_MS;
use flywheel_common::error::ConfigError;

use crate::action::{Action, ActionError};
use crate::input::CycleInput;
use crate::metrics::ActivityMetrics;
use crate::opbuffer::OpBuffer;
use crate::output::{Output, OutputError};
use crate::rate::RateLimiter;
use crate::segment::CycleResultSegment;
use crate::slot::{InvalidTransition, SlotState, SlotStateTracker};

// ─── Errors ─────────────────────────────────────────────────────────

/// Fatal motor failure; the slot lands in `Errored`.
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("slot {slot}: {source}")]
    InvalidState {
        slot: usize,
        #[source]
        source: InvalidTransition,
    },

    #[error("action init failed: {0}")]
    ActionInit(ActionError),

    #[error("action failed at cycle {cycle}: {source}")]
    Action {
        cycle: i64,
        #[source]
        source: ActionError,
    },

    #[error("output failed at cycle {cycle}: {source}")]
    Output {
        cycle: i64,
        #[source]
        source: OutputError,
    },
}

// ─── Shared Wiring ──────────────────────────────────────────────────

/// Per-activity wiring every motor re-reads at stride boundaries, which is
/// what makes online reconfiguration take effect without restarting
/// threads.
pub struct MotorLinks {
    stride: AtomicUsize,
    cycle_limiter: RwLock<Option<Arc<dyn RateLimiter>>>,
    stride_limiter: RwLock<Option<Arc<dyn RateLimiter>>>,
    phase_limiter: RwLock<Option<Arc<dyn RateLimiter>>>,
}

/// What a motor reads once per stride.
pub struct LinksSnapshot {
    pub stride: usize,
    pub cycle_limiter: Option<Arc<dyn RateLimiter>>,
    pub stride_limiter: Option<Arc<dyn RateLimiter>>,
    pub phase_limiter: Option<Arc<dyn RateLimiter>>,
}

impl MotorLinks {
    pub fn new(stride: usize) -> Self {
        Self {
            stride: AtomicUsize::new(stride.max(1)),
            cycle_limiter: RwLock::new(None),
            stride_limiter: RwLock::new(None),
            phase_limiter: RwLock::new(None),
        }
    }

    /// Change the stride; motors pick it up at their next segment read.
    pub fn set_stride(&self, stride: usize) {
        self.stride.store(stride.max(1), Ordering::Relaxed);
    }

    pub fn set_cycle_limiter(&self, limiter: Option<Arc<dyn RateLimiter>>) {
        *self.cycle_limiter.write() = limiter;
    }

    pub fn set_stride_limiter(&self, limiter: Option<Arc<dyn RateLimiter>>) {
        *self.stride_limiter.write() = limiter;
    }

    pub fn set_phase_limiter(&self, limiter: Option<Arc<dyn RateLimiter>>) {
        *self.phase_limiter.write() = limiter;
    }

    pub fn cycle_limiter(&self) -> Option<Arc<dyn RateLimiter>> {
        self.cycle_limiter.read().clone()
    }

    pub fn stride_limiter(&self) -> Option<Arc<dyn RateLimiter>> {
        self.stride_limiter.read().clone()
    }

    pub fn phase_limiter(&self) -> Option<Arc<dyn RateLimiter>> {
        self.phase_limiter.read().clone()
    }

    /// Consistent-enough view for one stride.
    pub fn snapshot(&self) -> LinksSnapshot {
        LinksSnapshot {
            stride: self.stride.load(Ordering::Relaxed).max(1),
            cycle_limiter: self.cycle_limiter(),
            stride_limiter: self.stride_limiter(),
            phase_limiter: self.phase_limiter(),
        }
    }
}

// ─── Motor ──────────────────────────────────────────────────────────

enum RunEnd {
    /// Input returned no more segments.
    Exhausted,
    /// Slot left `Running` (stop requested).
    StopRequested,
}

/// One worker: slot cell, action instance, and the shared collaborators.
pub struct Motor {
    slot: Arc<SlotStateTracker>,
    input: Arc<dyn CycleInput>,
    action: Action,
    output: Arc<dyn Output>,
    metrics: ActivityMetrics,
    links: Arc<MotorLinks>,
    /// Async stride buffers not yet confirmed dispatched.
    open_buffers: Vec<OpBuffer>,
}

impl Motor {
    pub fn new(
        slot: Arc<SlotStateTracker>,
        input: Arc<dyn CycleInput>,
        action: Action,
        output: Arc<dyn Output>,
        metrics: ActivityMetrics,
        links: Arc<MotorLinks>,
    ) -> Self {
        Self {
            slot,
            input,
            action,
            output,
            metrics,
            links,
            open_buffers: Vec::new(),
        }
    }

    /// Drive the slot through its whole lifecycle. Returns once the slot
    /// reaches `Stopped`, or with the fatal error that sent it to
    /// `Errored`.
    pub fn run(&mut self) -> Result<(), MotorError> {
        if let Err(e) = self.lifecycle() {
            tracing::error!(slot = self.slot.slot(), error = %e, "motor failed");
            let _ = self.slot.transition_to(SlotState::Errored);
            return Err(e);
        }
        Ok(())
    }

    fn lifecycle(&mut self) -> Result<(), MotorError> {
        self.transition(SlotState::Starting)?;

        let init = match &mut self.action {
            Action::Sync(action) => action.init(),
            Action::Async(action) => action.init(),
        };
        init.map_err(MotorError::ActionInit)?;

        self.input.start();
        let links = self.links.snapshot();
        for limiter in [
            &links.cycle_limiter,
            &links.stride_limiter,
            &links.phase_limiter,
        ]
        .into_iter()
        .flatten()
        {
            limiter.start();
        }

        self.transition(SlotState::Running)?;
        tracing::info!(slot = self.slot.slot(), "motor running");

        let end = if self.action.is_async() {
            self.run_async()?
        } else {
            self.run_sync()?
        };

        if matches!(end, RunEnd::Exhausted) {
            // Stop may have raced input exhaustion; Stopping wins the cell.
            let _ = self.slot.transition_to(SlotState::Finished);
        }

        if let Action::Async(action) = &mut self.action {
            let drained = action.await_completion(COMPLETION_TIMEOUT_MS);
            if !drained {
                tracing::warn!(
                    slot = self.slot.slot(),
                    timeout_ms = COMPLETION_TIMEOUT_MS,
                    "async completion timed out; abandoning outstanding ops"
                );
                for buffer in &self.open_buffers {
                    buffer.disarm();
                }
            }
        }
        self.check_open_buffers()?;

        self.transition(SlotState::Stopped)?;
        tracing::info!(slot = self.slot.slot(), "motor stopped");
        Ok(())
    }

    // ─── Sync branch ────────────────────────────────────────────────

    fn run_sync(&mut self) -> Result<RunEnd, MotorError> {
        loop {
            if !self.slot.is_running() {
                return Ok(RunEnd::StopRequested);
            }
            let links = self.links.snapshot();

            let read_start = Instant::now();
            let segment = self.input.next_segment(links.stride);
            self.metrics.read_input.record_since(read_start, 0);
            let Some(segment) = segment else {
                return Ok(RunEnd::Exhausted);
            };

            let stride_delay = links.stride_limiter.as_ref().map_or(0, |l| l.acquire());
            let stride_start = Instant::now();
            let mut results: Vec<(i64, i32)> = Vec::with_capacity(segment.remaining());

            let Action::Sync(action) = &mut self.action else {
                unreachable!("sync branch dispatched for async action");
            };
            for cycle in segment {
                if !self.slot.is_running() {
                    break;
                }
                let cycle_delay = links.cycle_limiter.as_ref().map_or(0, |l| l.acquire());
                let cycle_start = Instant::now();

                let mut result = action
                    .run_cycle(cycle)
                    .map_err(|e| MotorError::Action { cycle, source: e })?;
                if action.has_phases() {
                    while action.incomplete() {
                        let phase_delay =
                            links.phase_limiter.as_ref().map_or(0, |l| l.acquire());
                        let phase_start = Instant::now();
                        result = action
                            .run_phase(cycle)
                            .map_err(|e| MotorError::Action { cycle, source: e })?;
                        self.metrics.phases.record_since(phase_start, phase_delay);
                    }
                }

                self.metrics.cycles.record_since(cycle_start, cycle_delay);
                results.push((cycle, result));
            }

            emit_results(self.output.as_ref(), &results)
                .map_err(|(cycle, source)| MotorError::Output { cycle, source })?;
            self.metrics.strides.record_since(stride_start, stride_delay);
            if let Some(limiter) = &links.cycle_limiter {
                self.metrics.co_delay.set(limiter.total_scheduling_delay());
            }
        }
    }

    // ─── Async branch ───────────────────────────────────────────────

    fn run_async(&mut self) -> Result<RunEnd, MotorError> {
        loop {
            if !self.slot.is_running() {
                return Ok(RunEnd::StopRequested);
            }
            let links = self.links.snapshot();

            let read_start = Instant::now();
            let segment = self.input.next_segment(links.stride);
            self.metrics.read_input.record_since(read_start, 0);
            let Some(segment) = segment else {
                return Ok(RunEnd::Exhausted);
            };

            let stride_delay = links.stride_limiter.as_ref().map_or(0, |l| l.acquire());
            let stride_start = Instant::now();
            let buffer = OpBuffer::new(
                segment.remaining(),
                Arc::clone(&self.output),
                Some(Arc::clone(&self.metrics.cycles)),
            );

            let Action::Async(action) = &mut self.action else {
                unreachable!("async branch dispatched for sync action");
            };
            'cycles: for cycle in segment {
                if !self.slot.is_running() {
                    break;
                }
                let cycle_delay = links.cycle_limiter.as_ref().map_or(0, |l| l.acquire());
                let mut op = buffer.new_op();
                op.set_cycle(cycle);
                op.set_wait_nanos(cycle_delay);

                let mut pending = op;
                loop {
                    match action.enqueue(pending) {
                        Ok(()) => break,
                        Err(returned) => {
                            pending = returned;
                            if !self.slot.is_running() {
                                pending.abandon();
                                break 'cycles;
                            }
                            // Queue full is backpressure, not an error.
                            std::thread::yield_now();
                        }
                    }
                }
            }

            buffer.seal();
            self.open_buffers.push(buffer);
            self.check_open_buffers()?;
            self.metrics.strides.record_since(stride_start, stride_delay);
            if let Some(limiter) = &links.cycle_limiter {
                self.metrics.co_delay.set(limiter.total_scheduling_delay());
            }
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────

    /// Surface sink errors from dispatched stride buffers and drop them.
    fn check_open_buffers(&mut self) -> Result<(), MotorError> {
        for buffer in &self.open_buffers {
            if let Some(source) = buffer.take_sink_error() {
                return Err(MotorError::Output { cycle: -1, source });
            }
        }
        self.open_buffers.retain(|b| !b.is_dispatched());
        Ok(())
    }

    fn transition(&self, next: SlotState) -> Result<(), MotorError> {
        self.slot
            .transition_to(next)
            .map(|_| ())
            .map_err(|source| MotorError::InvalidState {
                slot: self.slot.slot(),
                source,
            })
    }
}

/// Deliver a stride's results, batching into a contiguous segment when the
/// cycle numbers allow it.
fn emit_results(
    output: &dyn Output,
    results: &[(i64, i32)],
) -> Result<(), (i64, OutputError)> {
    let Some(&(first, _)) = results.first() else {
        return Ok(());
    };
    let contiguous = results
        .iter()
        .enumerate()
        .all(|(i, &(cycle, _))| cycle == first + i as i64);
    if contiguous {
        let bytes = results
            .iter()
            .map(|&(_, r)| r.clamp(0, u8::MAX as i32) as u8)
            .collect();
        output
            .on_result_segment(&CycleResultSegment::new(first, bytes))
            .map_err(|e| (first, e))
    } else {
        for &(cycle, result) in results {
            output.on_cycle_result(cycle, result).map_err(|e| (cycle, e))?;
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
