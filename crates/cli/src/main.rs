//! aicrew CLI, the main entry point.
//!
//! Commands:
//! - `daemon`:  run every avatar on its schedule and serve the admin API
//! - `avatars`: list the avatar profiles that load
//! - `ingest`:  add a directory of documents to the knowledge store
//! - `check`:   validate configuration and profiles

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

#[derive(Parser)]
#[command(
    name = "aicrew",
    about = "aicrew: a scheduled AI avatar runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "AICREW_CONFIG", default_value = "aicrew.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler, avatar event loops, and admin gateway
    Daemon {
        /// Override the gateway port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List loaded avatar profiles
    Avatars,

    /// Ingest documents into the knowledge store
    Ingest {
        /// Directory to walk
        dir: PathBuf,
    },

    /// Validate configuration and profiles
    Check {
        /// Also call every model backend's health check
        #[arg(long)]
        probe: bool,

        /// Print the default configuration and exit
        #[arg(long)]
        print_default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log = logging::init(if cli.verbose { "debug" } else { "info" }, cli.log_json);

    let config = aicrew_config::AppConfig::load(&cli.config)
        .map_err(|e| format!("Failed to load config: {e}"))?;
    if !cli.verbose
        && !logging::env_filter_set()
        && let Err(e) = log.apply(&config.app.log_level)
    {
        tracing::warn!(level = %config.app.log_level, error = %e, "Ignoring invalid app.log_level");
    }

    match cli.command {
        Commands::Daemon { port } => commands::daemon::run(config, log, port).await?,
        Commands::Avatars => commands::avatars::run(&config)?,
        Commands::Ingest { dir } => commands::ingest::run(&config, &dir).await?,
        Commands::Check { probe, print_default } => {
            if print_default {
                println!("{}", aicrew_config::AppConfig::default_toml());
            } else {
                commands::check::run(&config, probe).await?;
            }
        }
    }

    Ok(())
}
