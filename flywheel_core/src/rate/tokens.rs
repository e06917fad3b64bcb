//! Two-bucket token pool for token-driven rate control.
//!
//! Tokens are nanoseconds of permission to run. The *active* bucket is what
//! takers draw from; it is normally capped at `max_active`, but backlog
//! promoted from the *waiting* bucket may raise it up to
//! `max_active · burst_ratio`. The waiting bucket is the unbounded backlog
//! of time that arrived while the active bucket was full; it drains into
//! the burst headroom on every refill.

use parking_lot::{Condvar, Mutex};

use flywheel_common::consts::NANOS_PER_SEC;
use flywheel_common::error::ConfigError;
use flywheel_common::rate_spec::RateSpec;

/// Smallest active bucket the pool will size itself to from a rate spec.
/// Keeps very fast rates from degenerating into a bucket of a few ns.
const MIN_ACTIVE_POOL: i64 = 1_000_000;

// ─── Token Pool ─────────────────────────────────────────────────────

/// Shared nanosecond-token accumulator refilled by a [`TokenFiller`]
/// (or by tests directly) and drained by takers.
///
/// [`TokenFiller`]: crate::rate::filler::TokenFiller
pub struct TokenPool {
    levels: Mutex<PoolLevels>,
    tokens_available: Condvar,
}

#[derive(Debug, Clone, Copy)]
struct PoolLevels {
    max_active: i64,
    /// `max_active · burst_ratio`: hard ceiling on the active bucket.
    max_over: i64,
    burst_ratio: f64,
    active: i64,
    waiting: i64,
}

impl TokenPool {
    /// Pool with an explicit active-bucket size. `burst_ratio` must be
    /// at least 1.0.
    pub fn new(max_active: i64, burst_ratio: f64) -> Result<Self, ConfigError> {
        if max_active <= 0 {
            return Err(ConfigError::BadParameter {
                key: "max_active",
                reason: format!("{max_active} must be positive"),
            });
        }
        if !burst_ratio.is_finite() || burst_ratio < 1.0 {
            return Err(ConfigError::BadParameter {
                key: "burst_ratio",
                reason: format!("{burst_ratio} must be >= 1.0"),
            });
        }
        Ok(Self {
            levels: Mutex::new(PoolLevels {
                max_active,
                max_over: (max_active as f64 * burst_ratio) as i64,
                burst_ratio,
                active: 0,
                waiting: 0,
            }),
            tokens_available: Condvar::new(),
        })
    }

    /// Pool sized for a rate spec: two grant periods of active tokens
    /// (floored at 1 ms worth) with the given burst ratio.
    pub fn for_spec(spec: &RateSpec, burst_ratio: f64) -> Result<Self, ConfigError> {
        spec.validate()?;
        let max_active = (spec.op_ticks() * 2).max(MIN_ACTIVE_POOL);
        Self::new(max_active, burst_ratio)
    }

    /// Add `nanos` of permission to the pool.
    ///
    /// Fills the active bucket to `max_active` first, parks the remainder
    /// in the waiting backlog, then promotes backlog into the burst
    /// headroom up to `max_over`. Returns the resulting active level.
    pub fn refill(&self, nanos: i64) -> i64 {
        self.refill_prorated(nanos, 1.0)
    }

    /// [`refill`](Self::refill) with the requested nanos scaled by
    /// `proportion` (clamped to `[0, 1]`) before applying.
    pub fn refill_prorated(&self, nanos: i64, proportion: f64) -> i64 {
        let amount = if proportion >= 1.0 {
            nanos.max(0)
        } else {
            (nanos.max(0) as f64 * proportion.max(0.0)) as i64
        };

        let mut levels = self.levels.lock();
        let needed = (levels.max_active - levels.active).max(0);
        let into_active = amount.min(needed);
        levels.active += into_active;
        levels.waiting += amount - into_active;

        // Promote backlog into the burst headroom.
        let headroom = (levels.max_over - levels.active).max(0);
        let promoted = headroom.min(levels.waiting);
        levels.waiting -= promoted;
        levels.active += promoted;

        self.tokens_available.notify_all();
        levels.active
    }

    /// Take up to `nanos` tokens without blocking; returns what was taken.
    pub fn take_up_to(&self, nanos: i64) -> i64 {
        let mut levels = self.levels.lock();
        let taken = nanos.max(0).min(levels.active);
        levels.active -= taken;
        taken
    }

    /// Block until `nanos` tokens are available, then take them whole.
    pub fn block_and_take(&self, nanos: i64) -> i64 {
        let nanos = nanos.max(0);
        let mut levels = self.levels.lock();
        while levels.active < nanos {
            self.tokens_available.wait(&mut levels);
        }
        levels.active -= nanos;
        nanos
    }

    /// Rescale the pool for a new rate spec, preserving the ratio of
    /// fullness so accumulated permission is neither lost nor inflated.
    pub fn apply(&self, spec: &RateSpec) -> Result<(), ConfigError> {
        spec.validate()?;
        let mut levels = self.levels.lock();
        let fullness = if levels.max_over > 0 {
            levels.active as f64 / levels.max_over as f64
        } else {
            0.0
        };
        levels.max_active = (spec.op_ticks() * 2).max(MIN_ACTIVE_POOL);
        levels.max_over = (levels.max_active as f64 * levels.burst_ratio) as i64;
        levels.active = (fullness * levels.max_over as f64) as i64;
        if levels.active > 0 {
            self.tokens_available.notify_all();
        }
        Ok(())
    }

    /// Current active level [ns].
    pub fn active(&self) -> i64 {
        self.levels.lock().active
    }

    /// Current waiting backlog [ns].
    pub fn waiting(&self) -> i64 {
        self.levels.lock().waiting
    }

    /// Active-bucket nominal cap [ns].
    pub fn max_active(&self) -> i64 {
        self.levels.lock().max_active
    }

    /// Burst headroom above the nominal cap [ns].
    pub fn max_burst(&self) -> i64 {
        let levels = self.levels.lock();
        levels.max_over - levels.max_active
    }

    /// Seconds of permission the active bucket currently holds.
    pub fn active_seconds(&self) -> f64 {
        self.active() as f64 / NANOS_PER_SEC as f64
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn refill_and_burst_promotion() {
        let pool = TokenPool::new(100, 1.1).unwrap();
        assert_eq!(pool.refill(100), 100);
        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.refill(100), 110);
        assert_eq!(pool.waiting(), 90);
        assert_eq!(pool.refill(10), 110);
        assert_eq!(pool.waiting(), 100);
        assert_eq!(pool.take_up_to(100), 100);
    }

    #[test]
    fn take_is_bounded_by_active() {
        let pool = TokenPool::new(1_000, 1.0).unwrap();
        pool.refill(250);
        assert_eq!(pool.take_up_to(400), 250);
        assert_eq!(pool.take_up_to(1), 0);
    }

    #[test]
    fn bucket_bounds_hold() {
        let pool = TokenPool::new(1_000, 1.5).unwrap();
        for _ in 0..50 {
            pool.refill(400);
            assert!(pool.active() <= 1_500);
            assert!(pool.active() >= 0);
            pool.take_up_to(130);
            assert!(pool.active() >= 0);
        }
    }

    #[test]
    fn prorated_refill_scales_down() {
        let pool = TokenPool::new(1_000, 1.0).unwrap();
        assert_eq!(pool.refill_prorated(100, 0.5), 50);
        assert_eq!(pool.active(), 50);
    }

    #[test]
    fn apply_preserves_fullness() {
        let pool = TokenPool::new(2_000_000, 1.0).unwrap();
        pool.refill(1_000_000); // half full
        pool.apply(&RateSpec::new(1000.0)).unwrap();
        // New max_active = 2 ms; still half full.
        assert_eq!(pool.max_active(), 2_000_000);
        assert_eq!(pool.active(), 1_000_000);
    }

    #[test]
    fn block_and_take_wakes_on_refill() {
        let pool = Arc::new(TokenPool::new(1_000, 1.0).unwrap());
        let taker = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.block_and_take(500))
        };
        // Feed the pool until the taker can be satisfied.
        for _ in 0..10 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            pool.refill(100);
        }
        assert_eq!(taker.join().unwrap(), 500);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(TokenPool::new(0, 1.1).is_err());
        assert!(TokenPool::new(100, 0.5).is_err());
        assert!(TokenPool::new(100, f64::NAN).is_err());
    }

    #[test]
    fn sized_from_spec() {
        let pool = TokenPool::for_spec(&RateSpec::new(1000.0), 1.1).unwrap();
        assert_eq!(pool.max_active(), 2_000_000);
        assert_eq!(pool.max_burst(), 200_000);
        // Very fast rates floor at 1 ms of active tokens.
        let fast = TokenPool::for_spec(&RateSpec::new(1e8), 1.1).unwrap();
        assert_eq!(fast.max_active(), MIN_ACTIVE_POOL);
    }
}
