//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod categories;
mod collect;
mod reset;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, LoadOptions};

#[derive(Parser)]
#[command(name = "jamhot-collect")]
#[command(about = "Collect training images for the Jam Hot fruit classifier")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file and JAMHOT_DATA_DIR)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

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
    /// Run a collection round for one or more categories
    Collect {
        /// Categories to collect (or use --all)
        categories: Vec<String>,
        /// Collect every configured category
        #[arg(short, long)]
        all: bool,
        /// Accepted images wanted per category
        #[arg(short, long, default_value = "50")]
        target: usize,
        /// Sources to pull from (repeatable; default from config)
        #[arg(short, long = "source")]
        sources: Vec<String>,
        /// Categories collected concurrently
        #[arg(short, long, default_value = "1")]
        parallel: usize,
        /// Show a progress bar
        #[arg(short = 'P', long)]
        progress: bool,
        /// Print round reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show image counts, processed URLs and sampler state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clear a category's processed URLs or the sampler state
    Reset {
        /// Category whose processed URLs should be forgotten
        category: Option<String>,
        /// Reset the sampler multiplier instead
        #[arg(long, conflicts_with = "category")]
        sampler: bool,
        /// Confirm the reset
        #[arg(long)]
        confirm: bool,
    },

    /// List configured categories
    Categories {
        /// Also print search terms
        #[arg(long)]
        terms: bool,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data_dir: cli.data,
    };
    let (settings, config) = load_settings(options).await?;

    match cli.command {
        Commands::Collect {
            categories,
            all,
            target,
            sources,
            parallel,
            progress,
            json,
        } => {
            collect::cmd_collect(
                &settings,
                &config,
                collect::CollectArgs {
                    categories,
                    all,
                    target,
                    sources,
                    parallel,
                    progress,
                    json,
                },
            )
            .await
        }
        Commands::Status { json } => status::cmd_status(&settings, &config, json).await,
        Commands::Reset {
            category,
            sampler,
            confirm,
        } => reset::cmd_reset(&settings, &config, category.as_deref(), sampler, confirm).await,
        Commands::Categories { terms } => categories::cmd_categories(&config, terms),
    }
}
