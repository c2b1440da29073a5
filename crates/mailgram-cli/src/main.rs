//! Mailgram CLI — entry point.
//!
//! # Commands
//!
//! - `mailgram run` — watch the mailbox and bridge it to the chat until Ctrl+C
//! - `mailgram sync` — one sync pass, then exit
//! - `mailgram onboard` — write the config and store credentials
//! - `mailgram status` — show configuration and sync state

mod gateway;
mod helpers;
mod onboard;
mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use mailgram_core::config::load_config;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 📬 Mailgram — your mailbox in a Telegram chat
#[derive(Parser)]
#[command(name = "mailgram", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.mailgram/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true, default_value_t = false)]
    logs: bool,

    /// Log as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge (mailbox watcher + chat front end)
    Run,

    /// Run one sync pass and exit
    Sync,

    /// Initialize configuration and store credentials
    Onboard,

    /// Show configuration and sync state
    Status,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .as_deref()
        .map(|p| helpers::expand_tilde(&p.to_string_lossy()));
    let config_path = config_path.as_deref();

    match cli.command {
        Commands::Run => {
            init_logging(cli.logs, cli.json);
            gateway::run(load_config(config_path)).await
        }
        Commands::Sync => {
            init_logging(cli.logs, cli.json);
            gateway::sync(load_config(config_path)).await
        }
        Commands::Onboard => {
            init_logging(cli.logs, cli.json);
            onboard::run(config_path).await
        }
        Commands::Status => status::run(config_path).await,
    }
}

/// Initialize tracing/logging. `RUST_LOG` overrides the default filter.
fn init_logging(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "mailgram=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
