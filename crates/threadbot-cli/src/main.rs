//! Threadbot CLI: entry point.
//!
//! # Commands
//!
//! - `threadbot gateway [--logs]`: connect to Discord and relay messages
//! - `threadbot status`: show configuration, credentials and store status
//! - `threadbot threads`: list stored user → thread mappings

mod gateway;
mod helpers;
mod status;
mod threads;

use anyhow::Result;
use clap::{Parser, Subcommand};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Threadbot: Discord relay for a hosted AI assistant
#[derive(Parser)]
#[command(name = "threadbot", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (Discord channel + relay)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and store status
    Status,

    /// List stored user → thread mappings
    Threads,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // .env first, so config loading sees its variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::Status => status::run().await,
        Commands::Threads => threads::run().await,
    }
}

/// Initialize tracing/logging. `RUST_LOG` wins when set.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "threadbot=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
