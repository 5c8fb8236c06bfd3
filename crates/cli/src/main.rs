//! RelayClaw CLI, the main entry point.
//!
//! Commands:
//! - `serve`    Start the routing proxy
//! - `routes`   Show the route table and available tiers
//! - `classify` Dry-run the routing cascade on a prompt
//! - `history`  Print a stored conversation

use clap::{Parser, Subcommand};
use relayclaw_config::AppConfig;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "relayclaw",
    about = "RelayClaw: tiered routing proxy for OpenAI-compatible model servers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.relayclaw/config.toml)
    #[arg(short, long, global = true, env = "RELAYCLAW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show the route table, aliases and routing tiers
    Routes,

    /// Route a prompt without calling the backend
    Classify {
        /// The prompt, including any override directive
        prompt: String,
    },

    /// Print the stored turns of a conversation
    History {
        conversation_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
    }

    let config_path = cli
        .config
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    match cli.command {
        Commands::Serve { port } => commands::serve::run(&config_path, port).await?,
        Commands::Routes => commands::routes::run(&config_path).await?,
        Commands::Classify { prompt } => commands::classify::run(&config_path, &prompt).await?,
        Commands::History { conversation_id } => {
            commands::history::run(&config_path, &conversation_id).await?
        }
    }

    Ok(())
}
