//! Motor and pool integration tests: shutdown semantics, async draining,
//! multi-phase actions, and metrics naming.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use flywheel_common::activity::ActivityDef;
use flywheel_core::action::{Action, ActionDispenser, ActionError, AsyncAction, SyncAction};
use flywheel_core::input::IntervalInput;
use flywheel_core::metrics::MetricsRegistry;
use flywheel_core::opbuffer::OpHandle;
use flywheel_core::output::{Output, VecOutput};
use flywheel_core::pool::MotorPool;
use flywheel_core::slot::SlotState;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

// ─── A queue-backed async action ────────────────────────────────────

/// Async action with a bounded queue and a worker thread completing ops:
/// `enqueue` refuses when full, every accepted op is stopped exactly once,
/// `await_completion` drains the queue.
struct QueueAction {
    sender: mpsc::Sender<OpHandle>,
    worker: Option<std::thread::JoinHandle<()>>,
    inflight: Arc<AtomicI64>,
    queue_limit: i64,
}

impl QueueAction {
    fn new(queue_limit: i64, work: Duration) -> Self {
        let (sender, receiver) = mpsc::channel::<OpHandle>();
        let inflight = Arc::new(AtomicI64::new(0));
        let worker_inflight = Arc::clone(&inflight);
        let worker = std::thread::Builder::new()
            .name("queue-action-worker".into())
            .spawn(move || {
                for op in receiver {
                    if !work.is_zero() {
                        std::thread::sleep(work);
                    }
                    op.stop(0);
                    worker_inflight.fetch_sub(1, Ordering::Release);
                }
            })
            .expect("worker spawn");
        Self {
            sender,
            worker: Some(worker),
            inflight,
            queue_limit,
        }
    }
}

impl AsyncAction for QueueAction {
    fn enqueue(&mut self, op: OpHandle) -> Result<(), OpHandle> {
        if self.inflight.load(Ordering::Acquire) >= self.queue_limit {
            return Err(op);
        }
        self.inflight.fetch_add(1, Ordering::AcqRel);
        self.sender.send(op).map_err(|e| {
            self.inflight.fetch_sub(1, Ordering::AcqRel);
            e.0
        })
    }

    fn await_completion(&mut self, timeout_ms: i64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
        while self.inflight.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Drop for QueueAction {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain out and exit.
        let (dead, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.sender, dead));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ─── Async shutdown (stop mid-run) ──────────────────────────────────

#[test]
fn async_motor_stop_drains_acknowledged_ops() {
    init_tracing();
    let output = Arc::new(VecOutput::new());
    let dispenser: Arc<dyn ActionDispenser> = Arc::new(|_slot: usize| {
        Action::Async(Box::new(QueueAction::new(64, Duration::from_micros(100))))
    });
    let pool = MotorPool::new(
        ActivityDef::from_param_string("alias=shutdown; threads=1; stride=50; async=true").unwrap(),
        Arc::new(IntervalInput::with_count(i64::MAX / 2)),
        dispenser,
        output.clone() as Arc<dyn Output>,
        &MetricsRegistry::new(),
    )
    .unwrap();

    pool.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    pool.request_stop();

    let results = pool.join();
    assert_eq!(results.len(), 1);
    results.into_iter().for_each(|(_, r)| r.unwrap());
    assert_eq!(pool.slot_states(), Vec::new()); // handles consumed by join

    // Every delivered op was acknowledged exactly once.
    let delivered = output.take();
    assert!(!delivered.is_empty());
    let unique: HashSet<i64> = delivered.iter().map(|(c, _)| *c).collect();
    assert_eq!(unique.len(), delivered.len());
    assert!(delivered.iter().all(|&(_, r)| r == 0));
}

#[test]
fn async_motor_finishes_bounded_input() {
    init_tracing();
    let output = Arc::new(VecOutput::new());
    let dispenser: Arc<dyn ActionDispenser> =
        Arc::new(|_slot: usize| Action::Async(Box::new(QueueAction::new(16, Duration::ZERO))));
    let pool = MotorPool::new(
        ActivityDef::from_param_string("alias=drain; threads=2; stride=25; async=true").unwrap(),
        Arc::new(IntervalInput::with_count(2_000)),
        dispenser,
        output.clone() as Arc<dyn Output>,
        &MetricsRegistry::new(),
    )
    .unwrap();

    pool.start().unwrap();
    for (slot, result) in pool.join() {
        result.unwrap_or_else(|e| panic!("slot {slot}: {e}"));
    }

    let delivered = output.take();
    assert_eq!(delivered.len(), 2_000);
    let unique: HashSet<i64> = delivered.iter().map(|(c, _)| *c).collect();
    assert_eq!(unique.len(), 2_000);
}

// ─── Multi-phase sync actions ───────────────────────────────────────

struct ThreePhase {
    phases_left: u32,
}

impl SyncAction for ThreePhase {
    fn run_cycle(&mut self, _cycle: i64) -> Result<i32, ActionError> {
        self.phases_left = 2;
        Ok(0)
    }

    fn has_phases(&self) -> bool {
        true
    }

    fn run_phase(&mut self, _cycle: i64) -> Result<i32, ActionError> {
        self.phases_left -= 1;
        Ok(if self.phases_left == 0 { 7 } else { 0 })
    }

    fn incomplete(&self) -> bool {
        self.phases_left > 0
    }
}

#[test]
fn multi_phase_action_runs_phases_per_cycle() {
    init_tracing();
    let output = Arc::new(VecOutput::new());
    let registry = MetricsRegistry::new();
    let dispenser: Arc<dyn ActionDispenser> =
        Arc::new(|_slot: usize| Action::Sync(Box::new(ThreePhase { phases_left: 0 })));
    let pool = MotorPool::new(
        ActivityDef::from_param_string("alias=phased; threads=1; stride=10").unwrap(),
        Arc::new(IntervalInput::with_count(100)),
        dispenser,
        output.clone() as Arc<dyn Output>,
        &registry,
    )
    .unwrap();

    pool.start().unwrap();
    pool.join().into_iter().for_each(|(_, r)| r.unwrap());

    // Each cycle ran two phases, and the last phase's result is recorded.
    assert_eq!(pool.metrics().phases.count(), 200);
    assert_eq!(pool.metrics().cycles.count(), 100);
    let delivered = output.take();
    assert_eq!(delivered.len(), 100);
    assert!(delivered.iter().all(|&(_, r)| r == 7));
}

// ─── Rate-limited pool end to end ───────────────────────────────────

struct Touch;

impl SyncAction for Touch {
    fn run_cycle(&mut self, _cycle: i64) -> Result<i32, ActionError> {
        Ok(0)
    }
}

#[test]
fn rate_limited_pool_paces_and_reports_metrics() {
    init_tracing();
    let output = Arc::new(VecOutput::new());
    let registry = MetricsRegistry::new();
    let dispenser: Arc<dyn ActionDispenser> =
        Arc::new(|_slot: usize| Action::Sync(Box::new(Touch)));
    let pool = MotorPool::new(
        ActivityDef::from_param_string(
            "alias=paced; threads=2; stride=10; cyclerate=5000,1.0,report",
        )
        .unwrap(),
        Arc::new(IntervalInput::with_count(500)),
        dispenser,
        output.clone() as Arc<dyn Output>,
        &registry,
    )
    .unwrap();

    let begin = Instant::now();
    pool.start().unwrap();
    pool.join().into_iter().for_each(|(_, r)| r.unwrap());
    let elapsed = begin.elapsed();

    // 500 cycles at 5000 ops/s: nominally 100 ms.
    assert!(elapsed >= Duration::from_millis(90), "elapsed {elapsed:?}");
    assert_eq!(output.len(), 500);

    // The fixed instrument names, and the per-activity delay gauge.
    assert_eq!(
        registry.timer_names(),
        vec!["cycles", "phases", "read_input", "strides"]
    );
    assert_eq!(registry.gauge_names(), vec!["cco-delay-paced"]);
    assert_eq!(pool.metrics().cycles.count(), 500);
    assert!(pool.metrics().cycles.snapshot().mean_nanos > 0.0);
}

// ─── Slot states after a clean run ──────────────────────────────────

#[test]
fn slots_transit_to_stopped_on_exhaustion() {
    init_tracing();
    let output = Arc::new(VecOutput::new());
    let dispenser: Arc<dyn ActionDispenser> =
        Arc::new(|_slot: usize| Action::Sync(Box::new(Touch)));
    let pool = MotorPool::new(
        ActivityDef::from_param_string("alias=states; threads=3").unwrap(),
        Arc::new(IntervalInput::with_count(300)),
        dispenser,
        output as Arc<dyn Output>,
        &MetricsRegistry::new(),
    )
    .unwrap();

    pool.start().unwrap();
    // Wait for every motor to reach a terminal state before joining.
    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.active_count() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(
        pool.slot_states()
            .iter()
            .all(|&s| s == SlotState::Stopped)
    );
    pool.join().into_iter().for_each(|(_, r)| r.unwrap());
}
