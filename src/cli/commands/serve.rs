//! `serve` command: start the HTTP server.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{self, AppState};
use crate::cli::args::ServeArgs;
use crate::config::{AttuneConfig, load_config};
use crate::error::AttuneError;
use crate::observability::init_metrics;

/// Start the HTTP server.
///
/// # Errors
///
/// Returns a config error if the configuration file is missing or
/// invalid, and a server error if binding or serving fails.
pub async fn run(args: &ServeArgs, cancel: CancellationToken) -> Result<(), AttuneError> {
    let mut config = if let Some(ref path) = args.config {
        info!(config = %path.display(), "loading configuration");
        load_config(path)?
    } else {
        info!("no configuration file; using built-in defaults");
        AttuneConfig::default()
    };

    if let Some(ref bind) = args.bind {
        config.server.bind.clone_from(bind);
    }

    let metrics_handle = init_metrics()?;
    let state = AppState::from_config(&config, metrics_handle, cancel.clone());

    match &config.analyzer.endpoint {
        Some(endpoint) => info!(%endpoint, "using HTTP analyzer"),
        None => info!("no analyzer endpoint configured; using lexical analyzer"),
    }

    api::serve(&config, state, cancel).await
}
