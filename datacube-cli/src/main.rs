//! Datacube CLI - Command-line interface
//!
//! Exit codes: `0` success, `2` finished with failed chunks or a withheld
//! commit, `1` error.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use commands::build::BuildArgs;
use commands::config::ConfigAction;
use commands::serve::ServeArgs;
use commands::worker::WorkerArgs;

#[derive(Parser)]
#[command(name = "datacube")]
#[command(version = datacube::VERSION)]
#[command(about = "Build cloud-free Sentinel-2 median data cubes", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/datacube/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a data cube: generate jobs, dispatch, commit
    Build(BuildArgs),
    /// Handle one chunk request from stdin (used by the process backend)
    Worker(WorkerArgs),
    /// Serve chunk requests over HTTP (used by the http backend)
    Serve(ServeArgs),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Build(args) => commands::build::run(args, config).await,
        Commands::Worker(args) => commands::worker::run(args, config).await,
        Commands::Serve(args) => commands::serve::run(args, config).await,
        Commands::Config { action } => commands::config::run(action, config),
    };

    match result {
        Ok(completion) => process::exit(completion.exit_code()),
        Err(e) => e.exit(),
    }
}
