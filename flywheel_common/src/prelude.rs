//! Prelude module for common re-exports.
//!
//! `use flywheel_common::prelude::*;` pulls in the types nearly every
//! consumer of the workspace needs.

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::activity::ActivityDef;
pub use crate::error::ConfigError;
pub use crate::rate_spec::RateSpec;

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{CYCLE_EXHAUSTED, DEFAULT_STRIDE, MAX_OPS_PER_SEC, NANOS_PER_SEC};
