//! Motor pool: lifecycle management for one activity's workers.
//!
//! The pool assembles the shared wiring from an [`ActivityDef`] (rate
//! limiters, stride, metrics), spawns one named thread per motor, and
//! applies online reconfiguration: rate changes flow through
//! `RateLimiter::update`, stride changes through the shared links, and
//! thread-count changes by spawning or stopping motors. Nothing restarts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use flywheel_common::activity::ActivityDef;
use flywheel_common::error::ConfigError;
use flywheel_common::rate_spec::RateSpec;

use crate::action::ActionDispenser;
use crate::input::CycleInput;
use crate::metrics::{ActivityMetrics, MetricsRegistry};
use crate::motor::{Motor, MotorError, MotorLinks};
use crate::output::Output;
use crate::rate::{AverageRateLimiter, RateLimiter};
use crate::slot::{SlotState, SlotStateTracker};

// ─── Errors ─────────────────────────────────────────────────────────

/// Error raised by pool assembly or teardown.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn motor thread: {0}")]
    Spawn(String),

    #[error("motor {slot} failed: {source}")]
    Motor {
        slot: usize,
        #[source]
        source: MotorError,
    },

    #[error("motor {slot} panicked")]
    Panicked {
        slot: usize,
    },
}

// ─── Motor Pool ─────────────────────────────────────────────────────

struct MotorHandle {
    slot_state: Arc<SlotStateTracker>,
    join: std::thread::JoinHandle<Result<(), MotorError>>,
}

/// One activity's motors and their shared collaborators.
pub struct MotorPool {
    alias: String,
    def: Mutex<ActivityDef>,
    input: Arc<dyn CycleInput>,
    dispenser: Arc<dyn ActionDispenser>,
    output: Arc<dyn Output>,
    metrics: ActivityMetrics,
    links: Arc<MotorLinks>,
    motors: Mutex<Vec<MotorHandle>>,
    next_slot: AtomicUsize,
}

impl MotorPool {
    /// Assemble a pool from a validated activity definition.
    pub fn new(
        def: ActivityDef,
        input: Arc<dyn CycleInput>,
        dispenser: Arc<dyn ActionDispenser>,
        output: Arc<dyn Output>,
        registry: &MetricsRegistry,
    ) -> Result<Self, PoolError> {
        def.validate()?;
        let alias = def.alias().to_string();
        let metrics = ActivityMetrics::new(registry, &alias);
        let links = Arc::new(MotorLinks::new(def.stride()));

        links.set_cycle_limiter(Self::build_limiter(&alias, "cyclerate", def.cycle_rate()?)?);
        links.set_stride_limiter(Self::build_limiter(&alias, "striderate", def.stride_rate()?)?);
        links.set_phase_limiter(Self::build_limiter(&alias, "phaserate", def.phase_rate()?)?);

        Ok(Self {
            alias,
            def: Mutex::new(def),
            input,
            dispenser,
            output,
            metrics,
            links,
            motors: Mutex::new(Vec::new()),
            next_slot: AtomicUsize::new(0),
        })
    }

    /// Identifier used in metric names and thread names.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The instrument bundle shared by this pool's motors.
    pub fn metrics(&self) -> &ActivityMetrics {
        &self.metrics
    }

    /// Spawn the configured number of motors.
    pub fn start(&self) -> Result<(), PoolError> {
        let threads = self.def.lock().threads();
        tracing::info!(activity = %self.alias, threads, "starting motor pool");
        self.spawn_motors(threads)
    }

    /// Apply a new definition to the running pool.
    ///
    /// Rates update in place (scheduling delay preserved), stride takes
    /// effect at the next segment read, and the motor count is rescaled
    /// by spawning or stopping workers.
    pub fn apply(&self, new_def: &ActivityDef) -> Result<(), PoolError> {
        new_def.validate()?;
        if new_def.alias() != self.alias {
            return Err(ConfigError::BadParameter {
                key: "alias",
                reason: "cannot be changed on a running activity".into(),
            }
            .into());
        }

        self.links.set_stride(new_def.stride());
        self.reconcile_limiter(
            "cyclerate",
            self.links.cycle_limiter(),
            new_def.cycle_rate()?,
            |l| self.links.set_cycle_limiter(l),
        )?;
        self.reconcile_limiter(
            "striderate",
            self.links.stride_limiter(),
            new_def.stride_rate()?,
            |l| self.links.set_stride_limiter(l),
        )?;
        self.reconcile_limiter(
            "phaserate",
            self.links.phase_limiter(),
            new_def.phase_rate()?,
            |l| self.links.set_phase_limiter(l),
        )?;

        let target = new_def.threads();
        let active = self.active_count();
        if target > active {
            self.spawn_motors(target - active)?;
        } else if target < active {
            self.stop_excess(active - target);
        }

        *self.def.lock() = new_def.clone();
        tracing::info!(activity = %self.alias, threads = target, "activity definition applied");
        Ok(())
    }

    /// Request a cooperative stop of the input and every running motor.
    pub fn request_stop(&self) {
        tracing::info!(activity = %self.alias, "stop requested");
        self.input.request_stop();
        for handle in self.motors.lock().iter() {
            handle.slot_state.request_stop();
        }
    }

    /// Join every motor, returning one result per slot.
    pub fn join(&self) -> Vec<(usize, Result<(), PoolError>)> {
        let handles: Vec<MotorHandle> = std::mem::take(&mut *self.motors.lock());
        handles
            .into_iter()
            .map(|handle| {
                let slot = handle.slot_state.slot();
                let result = match handle.join.join() {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(source)) => Err(PoolError::Motor { slot, source }),
                    Err(_) => Err(PoolError::Panicked { slot }),
                };
                (slot, result)
            })
            .collect()
    }

    /// Current state of every slot, in spawn order.
    pub fn slot_states(&self) -> Vec<SlotState> {
        self.motors
            .lock()
            .iter()
            .map(|h| h.slot_state.current())
            .collect()
    }

    /// Slots that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.motors
            .lock()
            .iter()
            .filter(|h| {
                let state = h.slot_state.current();
                !state.is_terminal() && state != SlotState::Stopping
            })
            .count()
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn build_limiter(
        alias: &str,
        kind: &str,
        spec: Option<RateSpec>,
    ) -> Result<Option<Arc<dyn RateLimiter>>, ConfigError> {
        match spec {
            None => Ok(None),
            Some(spec) => {
                let limiter = AverageRateLimiter::new(format!("{alias}.{kind}"), spec)?;
                limiter.start();
                Ok(Some(Arc::new(limiter)))
            }
        }
    }

    fn reconcile_limiter(
        &self,
        kind: &str,
        current: Option<Arc<dyn RateLimiter>>,
        spec: Option<RateSpec>,
        install: impl FnOnce(Option<Arc<dyn RateLimiter>>),
    ) -> Result<(), ConfigError> {
        match (current, spec) {
            (Some(limiter), Some(spec)) => limiter.update(spec),
            (None, Some(spec)) => {
                install(Self::build_limiter(&self.alias, kind, Some(spec))?);
                Ok(())
            }
            (Some(_), None) => {
                tracing::debug!(activity = %self.alias, kind, "rate limit removed");
                install(None);
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    fn spawn_motors(&self, count: usize) -> Result<(), PoolError> {
        for _ in 0..count {
            self.spawn_motor()?;
        }
        Ok(())
    }

    fn spawn_motor(&self) -> Result<(), PoolError> {
        let slot_index = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let action = self.dispenser.dispense(slot_index);
        if self.def.lock().is_async() && !action.is_async() {
            return Err(ConfigError::AsyncFlagOnSyncAction {
                alias: self.alias.clone(),
            }
            .into());
        }

        let slot_state = Arc::new(SlotStateTracker::new(slot_index));
        let mut motor = Motor::new(
            Arc::clone(&slot_state),
            Arc::clone(&self.input),
            action,
            Arc::clone(&self.output),
            self.metrics.clone(),
            Arc::clone(&self.links),
        );
        let affinity = self.def.lock().affinity()?;

        let join = std::thread::Builder::new()
            .name(format!("motor-{}-{slot_index}", self.alias))
            .spawn(move || {
                if !affinity.is_empty() {
                    let cpu = affinity[slot_index % affinity.len()];
                    if let Err(e) = crate::rt::pin_current_thread(cpu) {
                        tracing::warn!(slot = slot_index, cpu, error = %e, "cpu pinning failed");
                    }
                }
                motor.run()
            })
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        self.motors.lock().push(MotorHandle { slot_state, join });
        Ok(())
    }

    /// Stop the most recently spawned non-terminal motors.
    fn stop_excess(&self, count: usize) {
        let motors = self.motors.lock();
        let mut remaining = count;
        for handle in motors.iter().rev() {
            if remaining == 0 {
                break;
            }
            if handle.slot_state.request_stop() {
                remaining -= 1;
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
