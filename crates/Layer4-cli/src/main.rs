//! Pokedex CLI - Main entry point
//!
//! The same binary is both sides of the session:
//! `pokedex serve` is the tool process, every other command supervises a
//! session to it.

mod cli;
mod repl;

use clap::{Parser, Subcommand};
use pokedex_foundation::PokedexConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pokedex - Pokemon reference data over a supervised MCP session
#[derive(Parser, Debug)]
#[command(name = "pokedex")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Record store connection string (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Read configuration from this file instead of the global/project files
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run as the MCP tool process on stdin/stdout
    Serve,
    /// Look up a Pokemon (cache-backed)
    Lookup {
        name: String,
    },
    /// Live upstream search, bypassing the cache
    Search {
        name: String,
    },
    /// List cached Pokemon
    Cached,
    /// List Pokemon of a type
    Type {
        type_name: String,
        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Compare two Pokemon side by side
    Compare {
        first: String,
        second: String,
    },
    /// Check the tool process
    Status,
    /// Interactive session (one supervised connection for many commands)
    Repl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr: stdout carries the MCP stream in `serve`)
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => PokedexConfig::load_file(path)?,
        None => PokedexConfig::load()?,
    };
    if let Some(url) = args.database_url {
        config.database_url = Some(url);
    }

    match args.command {
        Command::Serve => cli::serve(&config).await?,
        Command::Repl => repl::run(&config).await?,
        Command::Lookup { name } => cli::run_once(&config, cli::Request::Lookup(name)).await?,
        Command::Search { name } => cli::run_once(&config, cli::Request::Search(name)).await?,
        Command::Cached => cli::run_once(&config, cli::Request::Cached).await?,
        Command::Type { type_name, limit } => {
            cli::run_once(&config, cli::Request::Type { type_name, limit }).await?
        }
        Command::Compare { first, second } => {
            cli::run_once(&config, cli::Request::Compare { first, second }).await?
        }
        Command::Status => cli::run_once(&config, cli::Request::Status).await?,
    }

    Ok(())
}
