//! CLI for the downpour download engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use downpour_core::config;

use commands::run_get;

/// Top-level CLI for the downpour download engine.
#[derive(Debug, Parser)]
#[command(name = "downpour")]
#[command(about = "downpour: segmented, resumable HTTP downloader", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a URL to a local file, resuming a previous partial download
    /// when its metadata is present.
    Get {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// Destination path; defaults to the URL's last path segment in the
        /// current directory.
        #[arg(short, long, value_name = "PATH")]
        output: Option<String>,

        /// Parallel range connections.
        #[arg(short, long, value_name = "N")]
        connections: Option<usize>,

        /// Speed cap in bytes per second (0 = unlimited).
        #[arg(long, value_name = "BYTES")]
        limit: Option<u64>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get {
                url,
                output,
                connections,
                limit,
            } => run_get(cfg, &url, output, connections, limit).await,
        }
    }
}
