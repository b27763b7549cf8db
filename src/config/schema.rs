//! Configuration schema and validation.
//!
//! YAML configuration with serde defaults throughout, so an empty file (or
//! no file at all) yields a fully working development setup. `validate`
//! collects every issue instead of failing on the first.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Severity, ValidationIssue};

// ============================================================================
// Root config
// ============================================================================

/// Root configuration for the Attune backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttuneConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Reconciler thresholds and policy.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Gap analyzer settings.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind, e.g. `"127.0.0.1:8080"`.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Per-session event ring buffer capacity (poll fallback depth).
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// What an `OfferSharing` decline closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingDeclinePolicy {
    /// Decline closes the current cycle only; a later cycle may offer again.
    #[default]
    PerCycle,
    /// Decline closes the direction for the rest of the session; later
    /// classifications are downgraded to Proceed.
    Session,
}

/// Reconciler thresholds and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcilerConfig {
    /// Scores below this proceed directly to reveal.
    #[serde(default = "default_t_low")]
    pub t_low: f64,
    /// Scores at or above this produce a strong sharing recommendation.
    #[serde(default = "default_t_high")]
    pub t_high: f64,
    /// Refinement cycles allowed per direction before the circuit breaker
    /// forces Proceed.
    #[serde(default = "default_max_refinements")]
    pub max_refinements: u32,
    /// Scope of an `OfferSharing` decline.
    #[serde(default)]
    pub sharing_decline_policy: SharingDeclinePolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            t_low: default_t_low(),
            t_high: default_t_high(),
            max_refinements: default_max_refinements(),
            sharing_decline_policy: SharingDeclinePolicy::default(),
        }
    }
}

/// Gap analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// HTTP endpoint of the external analyzer. When unset, the in-process
    /// lexical analyzer is used instead.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Analyzer call timeout, humantime-formatted (e.g. `"30s"`).
    #[serde(default = "default_analyzer_timeout")]
    pub timeout: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: default_analyzer_timeout(),
        }
    }
}

impl AnalyzerConfig {
    /// Parses the configured timeout.
    ///
    /// Falls back to 30 seconds if the string is invalid; `validate`
    /// reports the invalid string as an error before this can matter at
    /// runtime.
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.timeout).unwrap_or(Duration::from_secs(30))
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

const fn default_event_buffer() -> usize {
    256
}

const fn default_t_low() -> f64 {
    0.3
}

const fn default_t_high() -> f64 {
    0.7
}

const fn default_max_refinements() -> u32 {
    3
}

fn default_analyzer_timeout() -> String {
    "30s".to_string()
}

// ============================================================================
// Loading and validation
// ============================================================================

/// Loads and validates a configuration file.
///
/// # Errors
///
/// Returns [`ConfigError::MissingFile`] if the file cannot be read,
/// [`ConfigError::ParseError`] on malformed YAML, and
/// [`ConfigError::ValidationError`] carrying every issue found.
pub fn load_config(path: &Path) -> Result<AttuneConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;

    let config: AttuneConfig =
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let issues = config.validate();
    let errors: Vec<ValidationIssue> = issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .cloned()
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::ValidationError {
            path: path.display().to_string(),
            errors,
        });
    }

    for warning in issues {
        tracing::warn!(path = %warning.path, "{}", warning.message);
    }

    Ok(config)
}

impl AttuneConfig {
    /// Validates the configuration, collecting all issues.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if !(0.0..=1.0).contains(&self.reconciler.t_low) {
            issues.push(error("reconciler.t_low", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.reconciler.t_high) {
            issues.push(error("reconciler.t_high", "must be within [0, 1]"));
        }
        if self.reconciler.t_low >= self.reconciler.t_high {
            issues.push(error("reconciler.t_low", "must be below t_high"));
        }
        if self.reconciler.max_refinements == 0 {
            issues.push(error("reconciler.max_refinements", "must be at least 1"));
        }

        if humantime::parse_duration(&self.analyzer.timeout).is_err() {
            issues.push(error(
                "analyzer.timeout",
                "not a valid duration (expected e.g. \"30s\")",
            ));
        }
        if self.analyzer.endpoint.is_none() {
            issues.push(ValidationIssue {
                path: "analyzer.endpoint".to_string(),
                message: "no endpoint configured; using in-process lexical analyzer".to_string(),
                severity: Severity::Warning,
            });
        }

        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            issues.push(error("server.bind", "not a valid socket address"));
        }
        if self.server.event_buffer == 0 {
            issues.push(error("server.event_buffer", "must be at least 1"));
        }

        issues
    }
}

fn error(path: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        path: path.to_string(),
        message: message.to_string(),
        severity: Severity::Error,
    }
}
