//! Main entry point for the kline-archiver CLI

use clap::Parser;
use kline_archiver::cli::{Cli, EXIT_FAILURE, EXIT_SUCCESS};
use kline_archiver::shutdown::ShutdownCoordinator;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kline_archiver=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        let code = match command.execute() {
            Ok(true) => EXIT_SUCCESS,
            Ok(false) => EXIT_FAILURE,
            Err(e) => {
                error!("Command failed: {}", e);
                eprintln!("Error: {e}");
                e.exit_code()
            }
        };
        std::process::exit(code);
    }

    // Ctrl+C stops dispatching new downloads
    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing in-flight downloads...");
                shutdown.request_shutdown();
            }
        }
    });

    let code = match cli.execute(shutdown).await {
        Ok(summary) if summary.has_output_failures() => EXIT_FAILURE,
        Ok(_) => EXIT_SUCCESS,
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    std::process::exit(code);
}
