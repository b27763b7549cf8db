//! `attune` - stage-gated two-party conversation backend.

use clap::Parser;
use tokio_util::sync::CancellationToken;

use attune::cli::args::{Cli, Commands, LogFormatChoice};
use attune::cli::commands;
use attune::error::ExitCode;
use attune::observability::{LogFormat, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        let format = match &cli.command {
            Commands::Serve(args) if args.log_format == LogFormatChoice::Json => LogFormat::Json,
            _ => LogFormat::Human,
        };
        init_logging(format, cli.verbose, cli.color);
    }

    let cancel = CancellationToken::new();

    // Signal handler: first signal cancels gracefully, second forces exit.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }

        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        signal_cancel.cancel();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
            _ = sigterm.recv() => std::process::exit(ExitCode::TERMINATED),
        }
    });

    match commands::dispatch(cli, cancel).await {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
