//! Parley CLI, the main entry point.
//!
//! Commands:
//! - `run`      Start the relay (Telegram, or the console with `--console`)
//! - `doctor`   Diagnose configuration and collaborators
//! - `onboard`  Create the config directory and default files

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley: relay chat messages to an LLM and back",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Run {
        /// Chat on stdin/stdout instead of Telegram
        #[arg(long)]
        console: bool,
    },

    /// Diagnose configuration and collaborators
    Doctor,

    /// Create configuration files
    Onboard,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Run { console } => commands::run::run(console).await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Onboard => commands::onboard::run().await?,
    }

    Ok(())
}
