//! `validate` command: check configuration files without serving.

use std::path::Path;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::AttuneConfig;
use crate::error::{AttuneError, ConfigError, Severity, ValidationIssue};

/// Validate configuration files.
///
/// # Errors
///
/// Returns a config error for the first file that fails to load or
/// validate. With `--strict`, warnings are treated as errors.
pub fn run(args: &ValidateArgs) -> Result<(), AttuneError> {
    for path in &args.files {
        let issues = check_file(path)?;

        let failing: Vec<&ValidationIssue> = issues
            .iter()
            .filter(|i| i.severity == Severity::Error || args.strict)
            .collect();

        match args.format {
            OutputFormat::Human => {
                for issue in &issues {
                    println!("{}: {issue}", path.display());
                }
                if failing.is_empty() {
                    println!("{}: ok", path.display());
                }
            }
            OutputFormat::Json => {
                let report = serde_json::json!({
                    "file": path.display().to_string(),
                    "valid": failing.is_empty(),
                    "issues": issues,
                });
                println!("{report}");
            }
        }

        if !failing.is_empty() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: failing.into_iter().cloned().collect(),
            }
            .into());
        }
    }
    Ok(())
}

/// Parses one file and collects its validation issues.
fn check_file(path: &Path) -> Result<Vec<ValidationIssue>, AttuneError> {
    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    let config: AttuneConfig = serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(config.validate())
}
