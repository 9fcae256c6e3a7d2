// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-level configuration for the rule-chain runtime host.
//!
//! This provides [`RuntimeConfig`] — the top-level settings a daemon or CLI
//! binary starts from — together with [`load_config`] (TOML file, falling
//! back to defaults) and [`apply_env_overrides`] (`RCR_*` environment
//! variables layered on top). Unknown TOML keys are a hard [`ConfigError`],
//! not a silently ignored typo.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors that can occur while loading or validating [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML, or contained unknown keys.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Top-level runtime configuration for the rule-chain host process.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Admin HTTP surface bind address, e.g. `"0.0.0.0:8080"`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Tokio worker thread count. `0` lets the runtime pick a default based
    /// on available parallelism.
    #[serde(default)]
    pub worker_threads: usize,

    /// Per-chain debug-ring capacity, shared by every loaded chain unless a
    /// chain overrides it in its own DSL.
    #[serde(default = "default_debug_ring_capacity")]
    pub debug_ring_capacity: usize,

    /// Directory chain DSL files are loaded from at startup.
    #[serde(default)]
    pub chain_dir: Option<String>,

    /// Log rendering: `"pretty"` for human-readable, `"json"` for structured.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// `tracing-subscriber` `EnvFilter` directive string.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_debug_ring_capacity() -> usize {
    60
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            worker_threads: 0,
            debug_ring_capacity: default_debug_ring_capacity(),
            chain_dir: None,
            log_format: default_log_format(),
            log_filter: default_log_filter(),
        }
    }
}

/// Load a [`RuntimeConfig`] from an optional TOML file path, then apply
/// `RCR_*` environment overrides.
///
/// * If `path` is `Some`, reads and parses the file — a missing file or a
///   parse failure (including unknown keys) is an error.
/// * If `path` is `None`, starts from [`RuntimeConfig::default()`].
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => RuntimeConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`RuntimeConfig`]. Unknown keys are rejected.
pub fn parse_toml(content: &str) -> Result<RuntimeConfig, ConfigError> {
    toml::from_str::<RuntimeConfig>(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `RCR_LISTEN_ADDR`
/// - `RCR_WORKER_THREADS` (ignored, with the existing value kept, if not a
///   valid `usize`)
/// - `RCR_DEBUG_RING_CAPACITY` (same parse-failure handling)
/// - `RCR_CHAIN_DIR`
/// - `RCR_LOG_FORMAT`
/// - `RCR_LOG_FILTER`
pub fn apply_env_overrides(config: &mut RuntimeConfig) {
    if let Ok(val) = std::env::var("RCR_LISTEN_ADDR") {
        config.listen_addr = val;
    }
    if let Ok(val) = std::env::var("RCR_WORKER_THREADS")
        && let Ok(n) = val.parse::<usize>()
    {
        config.worker_threads = n;
    }
    if let Ok(val) = std::env::var("RCR_DEBUG_RING_CAPACITY")
        && let Ok(n) = val.parse::<usize>()
    {
        config.debug_ring_capacity = n;
    }
    if let Ok(val) = std::env::var("RCR_CHAIN_DIR") {
        config.chain_dir = Some(val);
    }
    if let Ok(val) = std::env::var("RCR_LOG_FORMAT") {
        config.log_format = val;
    }
    if let Ok(val) = std::env::var("RCR_LOG_FILTER") {
        config.log_filter = val;
    }
}

/// Validate semantic constraints [`parse_toml`] can't express structurally.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    if config.debug_ring_capacity == 0 {
        errors.push("debug_ring_capacity must be greater than zero".to_string());
    }
    if !matches!(config.log_format.as_str(), "pretty" | "json") {
        errors.push(format!("invalid log_format '{}': expected 'pretty' or 'json'", config.log_format));
    }
    if config.listen_addr.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!("invalid listen_addr '{}'", config.listen_addr));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = RuntimeConfig::default();
        validate_config(&config).expect("default config should be valid");
        assert_eq!(config.debug_ring_capacity, 60);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml = r#"
            listen_addr = "127.0.0.1:9000"
            log_format = "json"
        "#;
        let config = parse_toml(toml).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.log_format, "json");
        assert_eq!(config.debug_ring_capacity, 60);
    }

    #[test]
    fn unknown_key_is_a_hard_error() {
        let toml = r#"listen_addr = "127.0.0.1:9000"
            typo_field = true
        "#;
        let err = parse_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_log_format_fails_validation() {
        let mut config = RuntimeConfig::default();
        config.log_format = "verbose".to_string();
        let err = validate_config(&config).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("log_format")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn load_config_missing_file_is_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/rcr.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_config_from_real_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"listen_addr = "0.0.0.0:7000""#).unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:7000");
    }

    #[test]
    fn env_overrides_apply_on_top_of_file() {
        // SAFETY-equivalent note: test env vars are process-global; this test
        // sets and clears its own to avoid bleeding into other tests.
        unsafe {
            std::env::set_var("RCR_LOG_FILTER", "debug");
        }
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.log_filter, "debug");
        unsafe {
            std::env::remove_var("RCR_LOG_FILTER");
        }
    }
}
