//! imgcache CLI - Command-line interface
//!
//! This binary provides a command-line interface to the imgcache library.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::cache::{GetArgs, PutArgs};
use commands::key::KeyArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "imgcache")]
#[command(version = imgcache::VERSION)]
#[command(about = "Tiered cache for processed images", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.imgcache/config.ini
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the cache key for a source and its processing parameters
    Key(KeyArgs),
    /// Store a processed image
    Put(PutArgs),
    /// Fetch a processed image
    Get(GetArgs),
    /// Show cache metrics and the most and least accessed keys
    Stats,
    /// Remove expired entries and trim the disk tier to its size limit
    Cleanup,
    /// Evict memory to its watermark and recompress cold disk entries
    Optimize,
    /// Remove every cached entry
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Command::Key(args) = cli.command {
        commands::key::run(args);
        return Ok(());
    }

    let runner = CliRunner::new(cli.config.as_deref(), cli.verbose)?;
    let cache = runner.open_cache().await?;

    let result = match cli.command {
        Command::Key(_) => Ok(()),
        Command::Put(args) => commands::cache::put(&cache, args).await,
        Command::Get(args) => commands::cache::get(&cache, args).await,
        Command::Stats => commands::cache::stats(&cache).await,
        Command::Cleanup => commands::cache::cleanup(&cache).await,
        Command::Optimize => commands::cache::optimize(&cache).await,
        Command::Clear => commands::cache::clear(&cache).await,
    };

    cache.shutdown().await;
    result
}
