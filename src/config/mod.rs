//! # Instance Configuration
//!
//! Runtime-tunable options for a database instance. Every knob reachable via
//! `SET`/`SHOW` lives here as a per-instance atomic rather than process-global
//! state, so two instances in one process never observe each other's settings.
//!
//! ## Recognized Variables
//!
//! | Name | Type | Effect |
//! |------|------|--------|
//! | `simd_enabled` | bool | vectorized distance kernels |
//! | `parallel_enabled` | bool | permits future parallel executors |
//! | `cache_enabled` | bool | distance-function memoization cache |
//! | `log_timeout` | ms | log flush interval |
//! | `cycle_detection_interval` | ms | reserved (no deadlock detector runs) |
//!
//! Unknown variable names are rejected with `InvalidInput` at the session
//! layer; the enumeration is closed on purpose.

pub mod constants;

pub use constants::*;

use crate::error::DbError;
use eyre::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-instance session options. Shared via `Arc` by executors, indexes and
/// the background flush loop; all fields are atomics so `SET` never blocks a
/// running query.
#[derive(Debug)]
pub struct SessionConfig {
    simd_enabled: AtomicBool,
    parallel_enabled: AtomicBool,
    cache_enabled: AtomicBool,
    log_timeout_ms: AtomicU64,
    cycle_detection_interval_ms: AtomicU64,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            simd_enabled: AtomicBool::new(true),
            parallel_enabled: AtomicBool::new(false),
            cache_enabled: AtomicBool::new(false),
            log_timeout_ms: AtomicU64::new(DEFAULT_LOG_TIMEOUT_MS),
            cycle_detection_interval_ms: AtomicU64::new(DEFAULT_CYCLE_DETECTION_INTERVAL_MS),
        }
    }

    pub fn simd_enabled(&self) -> bool {
        self.simd_enabled.load(Ordering::Relaxed)
    }

    pub fn parallel_enabled(&self) -> bool {
        self.parallel_enabled.load(Ordering::Relaxed)
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    pub fn log_timeout_ms(&self) -> u64 {
        self.log_timeout_ms.load(Ordering::Relaxed)
    }

    pub fn cycle_detection_interval_ms(&self) -> u64 {
        self.cycle_detection_interval_ms.load(Ordering::Relaxed)
    }

    /// Applies `SET name = value`. The variable set is closed; unknown names
    /// and malformed values are `InvalidInput`.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        match name {
            "simd_enabled" => self.simd_enabled.store(parse_bool(name, value)?, Ordering::Relaxed),
            "parallel_enabled" => {
                self.parallel_enabled.store(parse_bool(name, value)?, Ordering::Relaxed);
            }
            "cache_enabled" => {
                self.cache_enabled.store(parse_bool(name, value)?, Ordering::Relaxed);
            }
            "log_timeout" => {
                self.log_timeout_ms.store(parse_millis(name, value)?, Ordering::Relaxed);
            }
            "cycle_detection_interval" => {
                self.cycle_detection_interval_ms.store(parse_millis(name, value)?, Ordering::Relaxed);
            }
            _ => {
                return Err(DbError::InvalidInput(format!("unrecognized variable: {name}")).into());
            }
        }
        Ok(())
    }

    /// Resolves `SHOW name` to its display string.
    pub fn show(&self, name: &str) -> Result<String> {
        let value = match name {
            "simd_enabled" => self.simd_enabled().to_string(),
            "parallel_enabled" => self.parallel_enabled().to_string(),
            "cache_enabled" => self.cache_enabled().to_string(),
            "log_timeout" => self.log_timeout_ms().to_string(),
            "cycle_detection_interval" => self.cycle_detection_interval_ms().to_string(),
            _ => {
                return Err(DbError::InvalidInput(format!("unrecognized variable: {name}")).into());
            }
        };
        Ok(value)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(DbError::InvalidInput(format!("{name} expects a boolean, got '{value}'")).into()),
    }
}

fn parse_millis(name: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| DbError::InvalidInput(format!("{name} expects milliseconds, got '{value}'")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = SessionConfig::new();
        assert!(config.simd_enabled());
        assert!(!config.parallel_enabled());
        assert!(!config.cache_enabled());
        assert_eq!(config.log_timeout_ms(), DEFAULT_LOG_TIMEOUT_MS);
        assert_eq!(
            config.cycle_detection_interval_ms(),
            DEFAULT_CYCLE_DETECTION_INTERVAL_MS
        );
    }

    #[test]
    fn set_and_show_round_trip() {
        let config = SessionConfig::new();
        config.set("cache_enabled", "on").unwrap();
        assert_eq!(config.show("cache_enabled").unwrap(), "true");
        config.set("log_timeout", "250").unwrap();
        assert_eq!(config.show("log_timeout").unwrap(), "250");
    }

    #[test]
    fn unknown_variable_is_rejected() {
        let config = SessionConfig::new();
        assert!(config.set("fsync_mode", "on").is_err());
        assert!(config.show("fsync_mode").is_err());
    }

    #[test]
    fn malformed_boolean_is_rejected() {
        let config = SessionConfig::new();
        assert!(config.set("simd_enabled", "sometimes").is_err());
    }
}
