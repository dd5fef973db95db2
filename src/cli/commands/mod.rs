//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod crawl;
mod jobs;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::load_settings;

#[derive(Parser)]
#[command(name = "pricecrawl")]
#[command(about = "Crawl, cache and track product prices across e-commerce platforms")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and the scheduler
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default: 127.0.0.1:3030)
        #[arg(default_value = "127.0.0.1:3030")]
        bind: String,
    },

    /// Fetch one product page and record its price
    Fetch {
        /// Product page URL
        url: String,
    },

    /// Search platforms for a keyword
    Search {
        keyword: String,
        /// Platforms to search (default: all)
        #[arg(short, long)]
        platform: Vec<String>,
    },

    /// Re-crawl stored products and record new prices
    Update {
        /// Product ids
        #[arg(required = true)]
        product_ids: Vec<String>,
    },

    /// Show scheduled jobs and their next run times
    Jobs,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (settings, _config) = load_settings(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve { bind } => serve::cmd_serve(settings, &bind).await,
        Commands::Fetch { url } => crawl::cmd_fetch(settings, &url).await,
        Commands::Search { keyword, platform } => {
            crawl::cmd_search(settings, &keyword, &platform).await
        }
        Commands::Update { product_ids } => crawl::cmd_update(settings, &product_ids).await,
        Commands::Jobs => jobs::cmd_jobs(settings).await,
    }
}
