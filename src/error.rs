//! Error types for Attune.
//!
//! A top-level [`AttuneError`] aggregates per-domain error enums and maps
//! each to a process exit code. Store errors additionally carry the HTTP
//! status the API layer should surface.

use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for Attune CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Server error (bind failure, runtime failure)
    pub const SERVER_ERROR: i32 = 4;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for Attune operations.
///
/// Aggregates all domain-specific errors and provides a unified interface
/// for error handling and exit code mapping.
#[derive(Debug, Error)]
pub enum AttuneError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Gap analyzer error
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    /// Server bind/runtime error
    #[error("server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AttuneError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Server(_) => ExitCode::SERVER_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Store(_) | Self::Analyzer(_) => ExitCode::ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: std::path::PathBuf,
    },

    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: std::path::PathBuf,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path (or `<inline>` for programmatic configs)
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },
}

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., `"reconciler.t_low"`)
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Validation failure that prevents the configuration from being used
    Error,
    /// Potential issue that does not prevent configuration loading
    Warning,
}

// ============================================================================
// Store Errors
// ============================================================================

/// Session store and state-transition errors.
///
/// Variants are split along the API taxonomy: validation failures surface
/// as 400, unknown entities as 404, real conflicts as 409. Idempotent
/// duplicates (re-consent, re-respond) are not errors at all — the store
/// returns a no-op success for those.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Session id does not exist
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Acting user is not one of the session's two participants
    #[error("user {user} is not a participant of session {session}")]
    NotAParticipant {
        /// Acting user id
        user: Uuid,
        /// Session id
        session: Uuid,
    },

    /// Consent called with no draft and no prior shared attempt
    #[error("no draft to consent for user {0}")]
    NoDraft(Uuid),

    /// Feelings statement required before the empathy stage can reconcile
    #[error("no feelings statement recorded for user {0}")]
    NoFeelingsStatement(Uuid),

    /// Resubmit/skip outside an open refinement window
    #[error("no refinement window open for user {0}")]
    RefinementNotOpen(Uuid),

    /// Share offer id does not exist in this session
    #[error("share offer not found: {0}")]
    OfferNotFound(Uuid),

    /// Offer response from a user who is not the offer's subject
    #[error("user {0} is not the subject of this share offer")]
    NotOfferSubject(Uuid),

    /// Accepting a share offer requires shared content
    #[error("accepting a share offer requires shared_content")]
    MissingSharedContent,

    /// Empty content where content is required
    #[error("content must not be empty")]
    EmptyContent,
}

impl StoreError {
    /// HTTP status the API layer should map this error to.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::SessionNotFound(_) | Self::OfferNotFound(_) => 404,
            Self::NotAParticipant { .. } | Self::NotOfferSubject(_) => 403,
            Self::RefinementNotOpen(_) => 409,
            Self::NoDraft(_)
            | Self::NoFeelingsStatement(_)
            | Self::MissingSharedContent
            | Self::EmptyContent => 400,
        }
    }
}

// ============================================================================
// Analyzer Errors
// ============================================================================

/// Gap analyzer errors.
///
/// These never surface to API callers — the reconciler recovers locally by
/// defaulting to a conservative offer.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Request exceeded the configured timeout
    #[error("analyzer timed out")]
    Timeout,

    /// Connection or transport failure
    #[error("analyzer network error: {0}")]
    Network(String),

    /// Non-2xx status from the analyzer endpoint
    #[error("analyzer returned HTTP {0}")]
    HttpStatus(u16),

    /// Response body could not be parsed
    #[error("invalid analyzer response: {0}")]
    InvalidResponse(String),

    /// Analyzer returned a score outside [0, 1]
    #[error("analyzer gap score out of range: {0}")]
    ScoreOutOfRange(f64),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for Attune operations.
pub type Result<T> = std::result::Result<T, AttuneError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::SERVER_ERROR, 4);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: AttuneError = ConfigError::MissingFile {
            path: std::path::PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_store_error_exit_code() {
        let err: AttuneError = StoreError::SessionNotFound(Uuid::nil()).into();
        assert_eq!(err.exit_code(), ExitCode::ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: AttuneError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_store_error_http_status() {
        assert_eq!(StoreError::SessionNotFound(Uuid::nil()).http_status(), 404);
        assert_eq!(StoreError::OfferNotFound(Uuid::nil()).http_status(), 404);
        assert_eq!(StoreError::NoDraft(Uuid::nil()).http_status(), 400);
        assert_eq!(StoreError::RefinementNotOpen(Uuid::nil()).http_status(), 409);
        assert_eq!(StoreError::MissingSharedContent.http_status(), 400);
        assert_eq!(
            StoreError::NotAParticipant {
                user: Uuid::nil(),
                session: Uuid::nil()
            }
            .http_status(),
            403
        );
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "reconciler.t_low".to_string(),
            message: "must be below t_high".to_string(),
            severity: Severity::Error,
        };
        assert_eq!(
            issue.to_string(),
            "error: must be below t_high at reconciler.t_low"
        );
    }

    #[test]
    fn test_validation_issue_warning_display() {
        let issue = ValidationIssue {
            path: "analyzer.endpoint".to_string(),
            message: "no endpoint configured, using lexical fallback".to_string(),
            severity: Severity::Warning,
        };
        assert!(issue.to_string().starts_with("warning:"));
    }
}
