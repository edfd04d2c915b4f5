use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::runtime;

/// Entry point for the `argus` binary. Deliberately thin — every subcommand
/// delegates straight into the runtime or config layers, keeping CLI parsing
/// fully separate from `runtime::run`.
#[derive(Parser)]
#[command(
    name = "argus",
    about = "Self-hosted OTLP trace/log ingest core",
    long_about = "argus ingests OpenTelemetry traces and logs over gRPC, persists them to an \
                   embedded SQLite store, and streams live updates to dashboard clients over \
                   WebSocket.",
    version,
    term_width = 100,
    color = clap::ColorChoice::Always,
    after_help = "\
    EXAMPLES:
        argus run
        argus validate
        APP_ENV=production GRPC_PORT=4317 argus run"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest-to-broadcast core until it receives a shutdown signal.
    Run,

    /// Load configuration from the environment and print it without
    /// starting any listener.
    Validate,

    /// Print version information.
    Version,
}

/// Entry function for CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => runtime::runtime::run().await?,
        Commands::Validate => validate_config()?,
        Commands::Version => show_version(),
    }

    Ok(())
}

/// Loads configuration from the environment and prints it for operator
/// review, without binding any port or opening the store.
fn validate_config() -> Result<()> {
    let cfg = crate::config::Config::load()?;
    println!("Configuration valid:\n{cfg:#?}");
    Ok(())
}

/// Show version information
fn show_version() {
    println!("argus {}", env!("CARGO_PKG_VERSION"));
}
