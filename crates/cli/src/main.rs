//! tabdata command-line entry point.
//!
//! Inspects and maintains the records stored for tabs. Logging goes to stderr
//! so stdout carries only the JSON result.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tabdata_core::{AppConfig, BackendRegistry, CacheCoordinator};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::{CloseParams, DeleteParams, ShowParams};

#[derive(Parser)]
#[command(version, about = "Inspect persisted tab data")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a stored record as JSON.
    Show(ShowParams),
    /// Delete a stored record.
    Delete(DeleteParams),
    /// Close a tab, deleting its short-lived records.
    Close(CloseParams),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    tracing::info!(storage_dir = %config.storage_dir.display(), "Starting tabdata");

    let registry = Arc::new(BackendRegistry::new(config)?);
    let output = match cli.cmd {
        Command::Show(params) => commands::show_impl(&registry, params).await?,
        Command::Delete(params) => commands::delete_impl(&registry, params).await?,
        Command::Close(params) => commands::close_impl(&CacheCoordinator::new(Arc::clone(&registry)), params).await?,
    };
    println!("{output}");

    Ok(())
}
