//! CLI argument definitions.
//!
//! All Clap derive structs for `attune` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

// ============================================================================
// Root CLI
// ============================================================================

/// Stage-gated two-party conversation backend.
#[derive(Parser, Debug)]
#[command(name = "attune", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "ATTUNE_COLOR")]
    pub color: ColorChoice,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server.
    Serve(ServeArgs),

    /// Validate configuration files without starting the server.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to YAML configuration file. Built-in defaults apply when
    /// omitted.
    #[arg(short, long, env = "ATTUNE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address override (`host:port`).
    #[arg(long)]
    pub bind: Option<String>,

    /// Log output format.
    #[arg(long, default_value = "human", env = "ATTUNE_LOG_FORMAT")]
    pub log_format: LogFormatChoice,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Log format choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormatChoice {
    /// Human-readable format.
    #[default]
    Human,
    /// Newline-delimited JSON.
    Json,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_with_config() {
        let cli = Cli::try_parse_from(["attune", "serve", "--config", "test.yaml"]);
        assert!(cli.is_ok(), "failed to parse: {cli:?}");
    }

    #[test]
    fn serve_without_config() {
        let cli = Cli::try_parse_from(["attune", "serve"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn help_output() {
        let result = Cli::try_parse_from(["attune", "--help"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn version_output() {
        let result = Cli::try_parse_from(["attune", "--version"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn color_choices_parse() {
        for variant in ["auto", "always", "never"] {
            let cli = Cli::try_parse_from(["attune", "--color", variant, "serve"]);
            assert!(cli.is_ok(), "failed to parse color={variant}");
        }
    }

    #[test]
    fn log_formats_parse() {
        for format in ["human", "json"] {
            let cli = Cli::try_parse_from(["attune", "serve", "--log-format", format]);
            assert!(cli.is_ok(), "failed to parse log-format={format}");
        }
    }

    #[test]
    fn validate_requires_files() {
        let result = Cli::try_parse_from(["attune", "validate"]);
        assert!(result.is_err(), "expected error for missing files");
    }

    #[test]
    fn verbose_count() {
        let cli = Cli::try_parse_from(["attune", "-vvv", "serve"]).unwrap();
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn quiet_flag() {
        let cli = Cli::try_parse_from(["attune", "--quiet", "serve"]).unwrap();
        assert!(cli.quiet);
    }

    #[test]
    fn bind_override() {
        let cli = Cli::try_parse_from(["attune", "serve", "--bind", "0.0.0.0:9090"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected ServeArgs");
        };
        assert_eq!(args.bind.as_deref(), Some("0.0.0.0:9090"));
    }
}
