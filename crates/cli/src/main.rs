//! ragbot CLI — the main entry point.
//!
//! Commands:
//! - `run`       — Telegram bot (optionally with the HTTP gateway)
//! - `ask`       — One question, or an interactive console session
//! - `retrieve`  — Print the knowledge base context for a query
//! - `serve`     — HTTP gateway only
//! - `doctor`    — Check configuration and upstream connectivity
//! - `onboard`   — Write a default config file

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "ragbot",
    about = "ragbot — answers questions from a managed RAG knowledge base",
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
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot
    Run {
        /// Also serve the HTTP gateway
        #[arg(long)]
        gateway: bool,
    },

    /// Ask a question in the terminal
    Ask {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Print the knowledge base context for a query
    Retrieve {
        query: String,

        /// Number of documents to fetch
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Diagnose configuration and connectivity
    Doctor,

    /// Write a default configuration file
    Onboard,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so answers on stdout stay clean
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run { gateway } => commands::run::run(gateway).await?,
        Commands::Ask { message } => commands::ask::run(message).await?,
        Commands::Retrieve { query, limit } => commands::retrieve::run(query, limit).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Onboard => commands::onboard::run().await?,
    }

    Ok(())
}
