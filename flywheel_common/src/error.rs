//! Configuration error type shared by all Flywheel crates.

/// Error raised while parsing or validating configuration.
///
/// All variants are fail-fast: nothing in the runtime attempts to repair a
/// rejected configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Rate outside `(0, 1e9]` ops/s.
    #[error("rate {0} ops/s out of range (must be > 0 and <= 1e9)")]
    InvalidRate(f64),

    /// Strictness outside `[0, 1]`.
    #[error("strictness {0} out of range (must be within [0, 1])")]
    InvalidStrictness(f64),

    /// A recognized parameter with an unusable value.
    #[error("parameter `{key}`: {reason}")]
    BadParameter {
        key: &'static str,
        reason: String,
    },

    /// A parameter name the activity definition does not recognize.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    /// `async` was asserted but the dispensed action is synchronous.
    #[error("activity `{alias}` declares async but its action is synchronous")]
    AsyncFlagOnSyncAction {
        alias: String,
    },

    /// File I/O error while loading a definition.
    #[error("failed to read {path}: {reason}")]
    Io {
        path: String,
        reason: String,
    },

    /// TOML parse error.
    #[error("activity definition parse error: {0}")]
    Parse(String),

    /// Tracker range parameters that cannot form a valid window.
    #[error("tracker range invalid: {reason}")]
    InvalidTrackerRange {
        reason: String,
    },
}
