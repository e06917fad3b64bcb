//! Rate limiter integration tests: pacing under real threads and a real
//! clock. Timing assertions carry generous slack for OS sleep jitter; the
//! deterministic schedule tests live next to the limiter with the manual
//! clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flywheel_common::rate_spec::RateSpec;
use flywheel_core::rate::{AverageRateLimiter, RateLimiter};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

/// Strict pacing across four threads converges on the configured rate.
#[test]
fn strict_rate_steady_state_across_threads() {
    init_tracing();
    let limiter = Arc::new(
        AverageRateLimiter::new("steady.cyclerate", RateSpec::new(1000.0).with_strictness(1.0))
            .unwrap(),
    );
    limiter.start();

    const THREADS: usize = 4;
    const PER_THREAD: usize = 150;
    let begin = Instant::now();
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            std::thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    limiter.acquire();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    let elapsed = begin.elapsed();

    // 600 grants at 1000 ops/s: nominally 0.6 s. Sleep overshoot only ever
    // slows a strict limiter down, so the lower bound is the sharp edge.
    assert!(elapsed >= Duration::from_millis(550), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1800), "elapsed {elapsed:?}");
}

/// Throughput over a window converges on the target rate.
#[test]
fn average_throughput_converges() {
    init_tracing();
    let limiter =
        AverageRateLimiter::new("conv.cyclerate", RateSpec::new(500.0).with_strictness(1.0))
            .unwrap();
    limiter.start();

    const OPS: usize = 300;
    let begin = Instant::now();
    for _ in 0..OPS {
        limiter.acquire();
    }
    let elapsed = begin.elapsed().as_secs_f64();
    let observed = OPS as f64 / elapsed;
    assert!(
        (380.0..=520.0).contains(&observed),
        "observed rate {observed:.1} ops/s over {elapsed:.3} s"
    );
}

/// Unclaimed budget accumulated while idle is spendable as a burst when
/// strictness is below 1, and pacing resumes once the credit is consumed.
#[test]
fn burst_credit_after_idle_then_settle() {
    init_tracing();
    let limiter =
        AverageRateLimiter::new("burst.cyclerate", RateSpec::new(1000.0).with_strictness(0.5))
            .unwrap();
    limiter.start();

    // Accumulate ~200 ms of unclaimed scheduling budget.
    std::thread::sleep(Duration::from_millis(200));

    let begin = Instant::now();
    for _ in 0..100 {
        limiter.acquire();
    }
    let burst = begin.elapsed();
    assert!(burst < Duration::from_millis(50), "burst took {burst:?}");

    // The credit is spent; the next batch is paced near the nominal rate.
    let begin = Instant::now();
    for _ in 0..100 {
        limiter.acquire();
    }
    let settled = begin.elapsed();
    assert!(settled >= Duration::from_millis(60), "settled in {settled:?}");
}

/// Strictness 1 never grants burst credit, idle or not.
#[test]
fn strict_mode_discards_idle_budget() {
    init_tracing();
    let limiter =
        AverageRateLimiter::new("noidle.cyclerate", RateSpec::new(1000.0).with_strictness(1.0))
            .unwrap();
    limiter.start();
    std::thread::sleep(Duration::from_millis(100));

    let begin = Instant::now();
    for _ in 0..50 {
        limiter.acquire();
    }
    // 50 grants at 1 ms spacing, minus the one grant that was already due.
    assert!(begin.elapsed() >= Duration::from_millis(45));
}

/// Reconfiguring mid-run preserves cumulative scheduling delay.
#[test]
fn update_preserves_cumulative_delay() {
    init_tracing();
    let limiter = AverageRateLimiter::new(
        "upd.cyclerate",
        RateSpec::new(1000.0)
            .with_strictness(0.0)
            .with_co_reporting(true),
    )
    .unwrap();
    limiter.start();

    // Fall ~80 ms behind schedule.
    std::thread::sleep(Duration::from_millis(80));
    let before = limiter.total_scheduling_delay();
    assert!(before >= 70_000_000, "before {before}");

    limiter
        .update(
            RateSpec::new(250.0)
                .with_strictness(1.0)
                .with_co_reporting(true),
        )
        .unwrap();
    let after = limiter.total_scheduling_delay();

    // Only the wall-clock time between the two reads may separate them.
    assert!(after >= before, "delay shrank: {before} -> {after}");
    assert!(after - before < 30_000_000, "delay jumped: {before} -> {after}");
    assert_eq!(limiter.rate(), 250.0);
}

/// Grants stay disjoint under contention: N threads acquiring a shared
/// budget never over- or under-run the schedule.
#[test]
fn stride_allowances_share_one_timeline() {
    init_tracing();
    let limiter = Arc::new(
        AverageRateLimiter::new("alloc.cyclerate", RateSpec::new(10_000.0).with_strictness(1.0))
            .unwrap(),
    );
    limiter.start();

    let begin = Instant::now();
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            // Each allowance covers ten grants at 0.1 ms apiece.
            std::thread::spawn(move || {
                for _ in 0..25 {
                    limiter.acquire_nanos(1_000_000);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    // 100 allowances of 1 ms each: nominally 100 ms of schedule.
    let elapsed = begin.elapsed();
    assert!(elapsed >= Duration::from_millis(90), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(600), "elapsed {elapsed:?}");
}
