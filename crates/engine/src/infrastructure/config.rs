//! Engine configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Size of the async handler pool when `EIRA_BUS_WORKERS` is unset.
pub const DEFAULT_BUS_WORKERS: usize = 2;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is invalid: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Engine configuration loaded from environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker tasks running async event handlers
    pub bus_workers: usize,
    /// How often timed instances are checked for expiry
    pub tick_interval: Duration,
    /// Adventure definition (JSON) loaded at startup
    pub adventure_path: Option<PathBuf>,
    /// JSON-lines event script replayed by the demo runner
    pub script_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bus_workers: DEFAULT_BUS_WORKERS,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            adventure_path: None,
            script_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bus_workers = match value("EIRA_BUS_WORKERS") {
            Some(raw) => parse_positive("EIRA_BUS_WORKERS", &raw)?,
            None => DEFAULT_BUS_WORKERS,
        };
        let tick_interval_ms = match value("EIRA_TICK_INTERVAL_MS") {
            Some(raw) => parse_positive("EIRA_TICK_INTERVAL_MS", &raw)?,
            None => DEFAULT_TICK_INTERVAL_MS,
        };

        Ok(Self {
            bus_workers,
            tick_interval: Duration::from_millis(tick_interval_ms),
            adventure_path: value("EIRA_ADVENTURE_PATH").map(PathBuf::from),
            script_path: value("EIRA_SCRIPT_PATH").map(PathBuf::from),
        })
    }
}

fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let parsed: T = raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("'{}': {}", raw, e),
    })?;
    if parsed == T::default() {
        return Err(ConfigError::Invalid {
            key,
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}
