//! Serve command - run the HTTP function service (http backend).

use std::net::SocketAddr;
use std::path::Path;

use clap::Args;
use datacube::processor::WorkerEnvironment;
use datacube::worker::{serve, StacWorkerHandler};

use super::common::{CLOUD_PROVIDER_ENV, REGION_ENV};
use super::Completion;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Default listen address of the function service.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Arguments for the serve command.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Region reported in results
    #[arg(long, env = REGION_ENV)]
    pub region: Option<String>,

    /// Cloud provider reported in results
    #[arg(long, env = CLOUD_PROVIDER_ENV)]
    pub cloud_provider: Option<String>,
}

/// Run the serve command until the process is stopped.
pub async fn run(args: ServeArgs, config_path: Option<&Path>) -> Result<Completion, CliError> {
    let runner = CliRunner::new(config_path, args.debug)?;
    runner.log_startup("serve");

    let environment = WorkerEnvironment::new(args.region, args.cloud_provider);
    let settings = runner.config().processor_settings(environment);
    let handler = StacWorkerHandler::from_settings(&settings)?;

    println!("Datacube worker service v{}", datacube::VERSION);
    println!("Listening on http://{}", args.listen);
    println!("Press Ctrl+C to stop");

    serve(args.listen, handler).await?;
    Ok(Completion::Complete)
}
