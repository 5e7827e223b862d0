use clap::{Parser, Subcommand};

mod commands;
mod config;
mod env_vars;
mod error;
mod output;

use commands::{checkpoint, health, metrics, recover, start, stop};
use output::print_error;

/// `tichain` - control surface for the time-series integrity ingestion
/// pipeline (start/stop the daemon, probe its health and metrics, and
/// drive one-shot recovery/checkpoint operations).
#[derive(Parser)]
#[command(name = "tichain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-series integrity ingestion pipeline control surface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion pipeline, gap recovery loop, and health/metrics
    /// server in the foreground.
    Start(start::StartArgs),

    /// Signal a running daemon (found via its pidfile) to shut down.
    Stop,

    /// Query the running daemon's health status.
    Health,

    /// Print the running daemon's Prometheus metrics exposition.
    Metrics,

    /// Replay outstanding chain gaps for one data source.
    Recover(recover::RecoverArgs),

    /// Record a manual checkpoint marker on a data source's chain.
    Checkpoint(checkpoint::CheckpointArgs),
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    let result = match cli.command {
        Commands::Start(args) => start::run(args).await,
        Commands::Stop => stop::run().await,
        Commands::Health => health::run().await,
        Commands::Metrics => metrics::run().await,
        Commands::Recover(args) => recover::run(args).await,
        Commands::Checkpoint(args) => checkpoint::run(args).await,
    };

    if let Err(e) = result {
        print_error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["tichain", "health"]).expect("parse health");
        assert!(matches!(cli.command, Commands::Health));

        let cli = Cli::try_parse_from(["tichain", "recover", "--source", "plant-1"]).expect("parse recover");
        assert!(matches!(cli.command, Commands::Recover(_)));
    }

    #[test]
    fn clap_enforces_required_args() {
        assert!(Cli::try_parse_from(["tichain", "recover"]).is_err());
        assert!(Cli::try_parse_from(["tichain", "checkpoint", "--source", "plant-1"]).is_err());
    }

    #[test]
    fn clap_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["tichain", "bogus"]).is_err());
    }
}
