//! Configuration loading, validation, and merging for the edge SDK
//! orchestration core.
//!
//! [`SdkConfig`] is the resolved, validated configuration `CoreSDK` is
//! constructed from. It is built by layering compiled-in defaults, an
//! optional TOML file, and environment variable overrides — each layer
//! produces typed [`ConfigError`]s or advisory [`ConfigWarning`]s rather than
//! panicking.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deprecated field was used in the configuration.
    DeprecatedField {
        /// Name of the deprecated field.
        field: String,
        /// Suggested replacement, if any.
        suggestion: Option<String>,
    },
    /// A recommended optional field is missing and a default was substituted.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Default value that was substituted.
        default_used: String,
    },
    /// The poll interval is unusually large.
    LargePollInterval {
        /// Configured interval, in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field, suggestion } => {
                write!(f, "deprecated field '{field}'")?;
                if let Some(s) = suggestion {
                    write!(f, " — use '{s}' instead")?;
                }
                Ok(())
            }
            ConfigWarning::MissingOptionalField { field, default_used } => {
                write!(f, "missing optional field '{field}', defaulting to '{default_used}'")
            }
            ConfigWarning::LargePollInterval { secs } => {
                write!(f, "poll interval is unusually large ({secs}s)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Resolved configuration `CoreSDK` is constructed from.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SdkConfig {
    /// Per-SDK home directory; all on-disk files (§6) are relative to this.
    pub home_dir: String,

    /// Short tag prepended to on-disk filenames so multiple SDK instances
    /// (or incompatible schema versions) can share one home directory.
    #[serde(default = "default_compatibility_tag")]
    pub compatibility_tag: String,

    /// Base URL of the control plane (cloud-config and asset endpoints).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_url: Option<String>,

    /// Seconds between background worker ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Number of online retry attempts before a download parks in
    /// `waiting_for_internet`.
    #[serde(default = "default_download_retries")]
    pub download_retries: u32,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Forces the orchestrator to skip network calls entirely; used by
    /// offline-cold-start tests (spec §8 scenario 1).
    #[serde(default)]
    pub force_offline: bool,
}

fn default_compatibility_tag() -> String {
    "edge_".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_download_retries() -> u32 {
    3
}

impl SdkConfig {
    /// Minimal config pointing at `home_dir`, with every other field
    /// defaulted. Convenient for tests and embedders.
    pub fn minimal(home_dir: impl Into<String>) -> Self {
        Self {
            home_dir: home_dir.into(),
            compatibility_tag: default_compatibility_tag(),
            control_plane_url: None,
            poll_interval_secs: default_poll_interval_secs(),
            download_retries: default_download_retries(),
            log_level: Some("info".into()),
            force_offline: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which a poll interval generates a warning.
const LARGE_POLL_INTERVAL_THRESHOLD_SECS: u64 = 3_600;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`SdkConfig`] from an optional TOML file path, layered under
/// `home_dir` (always required since it has no sensible compiled-in
/// default), then apply environment overrides.
pub fn load_config(home_dir: &str, path: Option<&Path>) -> Result<SdkConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => SdkConfig::minimal(home_dir),
    };
    config.home_dir = home_dir.to_string();
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into an [`SdkConfig`].
pub fn parse_toml(content: &str) -> Result<SdkConfig, ConfigError> {
    toml::from_str::<SdkConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `EDGE_CONTROL_PLANE_URL`
/// - `EDGE_LOG_LEVEL`
/// - `EDGE_POLL_INTERVAL_SECS`
/// - `EDGE_FORCE_OFFLINE`
pub fn apply_env_overrides(config: &mut SdkConfig) {
    if let Ok(val) = std::env::var("EDGE_CONTROL_PLANE_URL") {
        config.control_plane_url = Some(val);
    }
    if let Ok(val) = std::env::var("EDGE_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    if let Ok(val) = std::env::var("EDGE_POLL_INTERVAL_SECS")
        && let Ok(secs) = val.parse::<u64>()
    {
        config.poll_interval_secs = secs;
    }
    if let Ok(val) = std::env::var("EDGE_FORCE_OFFLINE") {
        config.force_offline = val == "1" || val.eq_ignore_ascii_case("true");
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (empty home directory, zero poll interval / retries, invalid
/// log level) are returned as [`ConfigError::ValidationError`]; soft issues
/// come back as warnings.
pub fn validate_config(config: &SdkConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.home_dir.trim().is_empty() {
        errors.push("home_dir must not be empty".into());
    }
    if config.poll_interval_secs == 0 {
        errors.push("poll_interval_secs must be greater than zero".into());
    } else if config.poll_interval_secs > LARGE_POLL_INTERVAL_THRESHOLD_SECS {
        warnings.push(ConfigWarning::LargePollInterval {
            secs: config.poll_interval_secs,
        });
    }
    if config.download_retries == 0 {
        errors.push("download_retries must be greater than zero".into());
    }
    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if config.control_plane_url.is_none() && !config.force_offline {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "control_plane_url".into(),
            default_used: "force_offline=true behaviour (no network calls attempted)".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_is_valid() {
        let cfg = SdkConfig::minimal("/tmp/edge-home");
        let warnings = validate_config(&cfg).expect("minimal config should be valid");
        assert!(!warnings.is_empty(), "should warn about missing control_plane_url");
    }

    #[test]
    fn minimal_config_has_sensible_defaults() {
        let cfg = SdkConfig::minimal("/tmp/edge-home");
        assert_eq!(cfg.poll_interval_secs, 30);
        assert_eq!(cfg.download_retries, 3);
        assert_eq!(cfg.compatibility_tag, "edge_");
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml = r#"
            home_dir = "/tmp/edge-home"
            log_level = "debug"
            control_plane_url = "https://example.test"
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.home_dir, "/tmp/edge-home");
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.control_plane_url.as_deref(), Some("https://example.test"));
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_invalid_log_level() {
        let mut cfg = SdkConfig::minimal("/tmp/edge-home");
        cfg.log_level = Some("verbose".into());
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_zero_poll_interval() {
        let mut cfg = SdkConfig::minimal("/tmp/edge-home");
        cfg.poll_interval_secs = 0;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_warns_on_large_poll_interval() {
        let mut cfg = SdkConfig::minimal("/tmp/edge-home");
        cfg.poll_interval_secs = 7_200;
        cfg.control_plane_url = Some("https://example.test".into());
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::LargePollInterval { .. })));
    }

    #[test]
    fn load_config_missing_file_errors() {
        let err = load_config("/tmp/edge-home", Some(Path::new("/nonexistent/edge.toml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_config_without_file_uses_minimal() {
        let cfg = load_config("/tmp/edge-home", None).unwrap();
        assert_eq!(cfg.home_dir, "/tmp/edge-home");
        assert_eq!(cfg.poll_interval_secs, 30);
    }
}
