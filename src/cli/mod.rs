use crate::errors::AppResult;
use clap::{Parser, Subcommand};
use tracing_subscriber;

pub mod commands;

/// Bitcoin UTXO Forensics Engine
#[derive(Parser)]
#[command(name = "chain-forensics")]
#[command(about = "Trace fund provenance and destination, detect CoinJoin mixing, and build fund-movement timelines")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Trace fund flow forward, backward or both from a seed
    Trace(commands::trace::TraceCommand),
    /// Build a chronological fund-movement timeline
    Timeline(commands::timeline::TimelineCommand),
    /// Classify transactions as CoinJoin / mixing
    Classify(commands::classify::ClassifyCommand),
    /// Test blockchain gateway connectivity
    TestGateway(commands::test_gateway::TestGatewayCommand),
}

pub async fn run() -> AppResult<()> {
    // Initialise tracing subscriber to capture info!() macros
    // Uses RUST_LOG environment variable (defaults to "error" if not set)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Trace(command) => command.run().await,
        Commands::Timeline(command) => command.run().await,
        Commands::Classify(command) => command.run().await,
        Commands::TestGateway(command) => command.run().await,
    }
}
