//! Activity definition: the key→value parameter map an external controller
//! mutates to reconfigure a running activity.
//!
//! Recognized keys:
//!
//! | Key | Effect |
//! |-----|--------|
//! | `alias` | Identifier used in metric names. |
//! | `threads` | Number of motors. |
//! | `stride` | Cycles per segment acquisition (default 1). |
//! | `async` | Asserts the action is async. |
//! | `cyclerate`, `striderate`, `phaserate` | `"<ops/s>[,<strictness>[,report]]"`. |
//! | `affinity` | Comma-separated CPU list for motor threads (rt builds). |
//!
//! Definitions load from a compact `key=value;key=value` string or from a
//! TOML table; both paths run the same `validate()` pass, which fails fast
//! on unknown keys and unusable values.

use std::collections::BTreeMap;
use std::path::Path;

use crate::consts::DEFAULT_STRIDE;
use crate::error::ConfigError;
use crate::rate_spec::RateSpec;

/// Parameter names an activity definition accepts.
const RECOGNIZED_KEYS: &[&str] = &[
    "alias",
    "threads",
    "stride",
    "async",
    "cyclerate",
    "striderate",
    "phaserate",
    "affinity",
];

/// Fallback alias when none is configured.
const DEFAULT_ALIAS: &str = "unnamed";

// ─── Activity Definition ────────────────────────────────────────────

/// Validated key→value parameters for one activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityDef {
    params: BTreeMap<String, String>,
}

impl ActivityDef {
    /// An empty definition (single thread, stride 1, no rate limits).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the compact `key=value;key=value` form.
    pub fn from_param_string(text: &str) -> Result<Self, ConfigError> {
        let mut params = BTreeMap::new();
        for field in text.split(';').map(str::trim).filter(|f| !f.is_empty()) {
            let (key, value) = field.split_once('=').ok_or_else(|| ConfigError::Parse(
                format!("expected key=value, found `{field}`"),
            ))?;
            params.insert(key.trim().to_string(), value.trim().to_string());
        }
        let def = Self { params };
        def.validate()?;
        Ok(def)
    }

    /// Parse a TOML table of scalar values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut params = BTreeMap::new();
        for (key, value) in table {
            let rendered = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(ConfigError::Parse(format!(
                        "parameter `{key}` has non-scalar value `{other}`"
                    )))
                }
            };
            params.insert(key, rendered);
        }
        let def = Self { params };
        def.validate()?;
        Ok(def)
    }

    /// Load a definition from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Set one parameter, re-validating the definition.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let previous = self.params.insert(key.to_string(), value.to_string());
        if let Err(e) = self.validate() {
            // Roll back so the definition stays usable after a rejected set.
            match previous {
                Some(old) => {
                    self.params.insert(key.to_string(), old);
                }
                None => {
                    self.params.remove(key);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Raw parameter lookup.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    // ─── Typed accessors ────────────────────────────────────────────

    /// Identifier used in metric names.
    #[inline]
    pub fn alias(&self) -> &str {
        self.get("alias").unwrap_or(DEFAULT_ALIAS)
    }

    /// Number of motors (default 1).
    pub fn threads(&self) -> usize {
        self.parsed_or("threads", 1)
    }

    /// Cycles per segment acquisition (default 1).
    pub fn stride(&self) -> usize {
        self.parsed_or("stride", DEFAULT_STRIDE)
    }

    /// Whether the action is asserted to be async.
    pub fn is_async(&self) -> bool {
        self.parsed_or("async", false)
    }

    /// Per-cycle rate limit, if configured.
    pub fn cycle_rate(&self) -> Result<Option<RateSpec>, ConfigError> {
        self.rate_of("cyclerate")
    }

    /// Per-stride rate limit, if configured.
    pub fn stride_rate(&self) -> Result<Option<RateSpec>, ConfigError> {
        self.rate_of("striderate")
    }

    /// Per-phase rate limit, if configured.
    pub fn phase_rate(&self) -> Result<Option<RateSpec>, ConfigError> {
        self.rate_of("phaserate")
    }

    /// CPU list for motor-thread pinning (rt builds), empty when unset.
    pub fn affinity(&self) -> Result<Vec<usize>, ConfigError> {
        match self.get("affinity") {
            None => Ok(Vec::new()),
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| {
                    f.parse::<usize>().map_err(|e| ConfigError::BadParameter {
                        key: "affinity",
                        reason: format!("cpu `{f}`: {e}"),
                    })
                })
                .collect(),
        }
    }

    /// Fail fast on unknown keys and unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for key in self.params.keys() {
            if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::UnknownParameter(key.clone()));
            }
        }
        self.require_parsable::<usize>("threads")?;
        self.require_parsable::<usize>("stride")?;
        self.require_parsable::<bool>("async")?;
        if self.threads() == 0 {
            return Err(ConfigError::BadParameter {
                key: "threads",
                reason: "must be at least 1".into(),
            });
        }
        if self.stride() == 0 {
            return Err(ConfigError::BadParameter {
                key: "stride",
                reason: "must be at least 1".into(),
            });
        }
        self.cycle_rate()?;
        self.stride_rate()?;
        self.phase_rate()?;
        self.affinity()?;
        Ok(())
    }

    fn rate_of(&self, key: &'static str) -> Result<Option<RateSpec>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => RateSpec::parse(raw).map(Some),
        }
    }

    fn require_parsable<T>(&self, key: &'static str) -> Result<(), ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.get(key) {
            raw.parse::<T>().map_err(|e| ConfigError::BadParameter {
                key,
                reason: format!("`{raw}`: {e}"),
            })?;
        }
        Ok(())
    }

    fn parsed_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        // validate() has already rejected unparsable values for these keys;
        // a missing key falls back to the documented default.
        self.get(key)
            .and_then(|raw| raw.parse::<T>().ok())
            .unwrap_or(default)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
