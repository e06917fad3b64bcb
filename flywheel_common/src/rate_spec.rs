//! Rate specification value type.
//!
//! A [`RateSpec`] names a target throughput, a strictness knob selecting the
//! blend between isochronous and bursty pacing, and whether acquisitions
//! should report coordinated-omission delay. Limiters derive their timeline
//! parameters (`op_ticks`, `burst_shift`) from it and never store anything
//! else about pacing.

use serde::{Deserialize, Serialize};

use crate::consts::{MAX_OPS_PER_SEC, NANOS_PER_SEC};
use crate::error::ConfigError;

// ─── Rate Spec ──────────────────────────────────────────────────────

/// Target rate, strictness and delay-reporting flag for one rate limiter.
///
/// Two specs are equivalent iff all three fields are equal. Valid specs
/// satisfy `0 < ops_per_sec <= 1e9` and `strictness ∈ [0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSpec {
    /// Target throughput [ops/s].
    pub ops_per_sec: f64,
    /// Pacing strictness: 1.0 = isochronous, 0.0 = average with unbounded
    /// burst absorption.
    pub strictness: f64,
    /// Report coordinated-omission delay from `acquire`.
    pub report_co_delay: bool,
}

impl RateSpec {
    /// A bursty (strictness 0) spec at the given rate, no delay reporting.
    pub const fn new(ops_per_sec: f64) -> Self {
        Self {
            ops_per_sec,
            strictness: 0.0,
            report_co_delay: false,
        }
    }

    /// Builder-style strictness override.
    pub const fn with_strictness(mut self, strictness: f64) -> Self {
        self.strictness = strictness;
        self
    }

    /// Builder-style delay-reporting override.
    pub const fn with_co_reporting(mut self, report: bool) -> Self {
        self.report_co_delay = report;
        self
    }

    /// Parse the `"<ops/s>[,<strictness>[,report]]"` parameter form.
    ///
    /// The third field, when present, must be the literal `report`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut fields = text.split(',').map(str::trim);

        let ops_per_sec = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ConfigError::BadParameter {
                key: "rate",
                reason: "empty rate specifier".into(),
            })?
            .parse::<f64>()
            .map_err(|e| ConfigError::BadParameter {
                key: "rate",
                reason: format!("ops/s not a number: {e}"),
            })?;

        let strictness = match fields.next() {
            Some(raw) => raw.parse::<f64>().map_err(|e| ConfigError::BadParameter {
                key: "rate",
                reason: format!("strictness not a number: {e}"),
            })?,
            None => 0.0,
        };

        let report_co_delay = match fields.next() {
            Some("report") => true,
            Some(other) => {
                return Err(ConfigError::BadParameter {
                    key: "rate",
                    reason: format!("expected `report`, found `{other}`"),
                })
            }
            None => false,
        };

        if let Some(extra) = fields.next() {
            return Err(ConfigError::BadParameter {
                key: "rate",
                reason: format!("trailing field `{extra}`"),
            });
        }

        let spec = Self {
            ops_per_sec,
            strictness,
            report_co_delay,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Reject rates outside `(0, 1e9]` and strictness outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ops_per_sec.is_finite()
            || self.ops_per_sec <= 0.0
            || self.ops_per_sec > MAX_OPS_PER_SEC
        {
            return Err(ConfigError::InvalidRate(self.ops_per_sec));
        }
        if !self.strictness.is_finite() || !(0.0..=1.0).contains(&self.strictness) {
            return Err(ConfigError::InvalidStrictness(self.strictness));
        }
        Ok(())
    }

    /// Nanoseconds per grant at this rate.
    ///
    /// Computed in f64 and truncated; a validated spec always yields at
    /// least one tick.
    #[inline]
    pub fn op_ticks(&self) -> i64 {
        (NANOS_PER_SEC as f64 / self.ops_per_sec) as i64
    }

    /// Right-shift applied when closing scheduling gaps.
    ///
    /// Maps strictness 1.0 → 0 (every gap closed whole, no burst credit)
    /// and strictness 0.0 → 63 (gaps preserved, full burst credit), with
    /// intermediate values on the leading-zero curve of `strictness · 2⁶³`.
    #[inline]
    pub fn burst_shift(&self) -> u32 {
        if self.strictness <= 0.0 {
            return 63;
        }
        let scaled = (self.strictness * (1u64 << 63) as f64) as u64;
        scaled.leading_zeros().min(63)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
