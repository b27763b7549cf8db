//! CLI command dispatch and handlers.
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod serve;
pub mod validate;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands};
use crate::error::AttuneError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), AttuneError> {
    match cli.command {
        Commands::Serve(args) => serve::run(&args, cancel).await,
        Commands::Validate(args) => validate::run(&args),
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
