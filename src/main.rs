use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sluice_core::config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sluice", version, about = "Container log ingestion, storage and live tails")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume the log stream and serve the HTTP API.
    Serve {
        /// TOML file layered over the built-in defaults.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Log at debug level regardless of configuration.
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, debug } => {
            let config = Config::load(config.as_deref())?;
            init_tracing(&config.log_level, debug);
            tracing::info!(
                brokers = %config.stream.brokers,
                topic = %config.stream.topic,
                store = ?config.store.backend,
                "sluice starting"
            );
            sluice::server::serve(config).await
        }
    }
}

fn init_tracing(level: &str, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
