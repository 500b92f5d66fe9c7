//! Worker command - handle one chunk request on stdin (process backend).

use std::path::Path;

use clap::Args;
use datacube::executor::InvocationResponse;
use datacube::processor::WorkerEnvironment;
use datacube::worker::{run_stdio, StacWorkerHandler};

use super::common::{CLOUD_PROVIDER_ENV, REGION_ENV};
use super::Completion;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the worker command.
#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Enable debug logging (on stderr)
    #[arg(long)]
    pub debug: bool,

    /// Region reported in the result
    #[arg(long, env = REGION_ENV)]
    pub region: Option<String>,

    /// Cloud provider reported in the result
    #[arg(long, env = CLOUD_PROVIDER_ENV)]
    pub cloud_provider: Option<String>,
}

/// Run the worker command.
///
/// A failed chunk is still a successful worker run: the error travels back
/// in the response document and the dispatcher decides whether to retry.
pub async fn run(args: WorkerArgs, config_path: Option<&Path>) -> Result<Completion, CliError> {
    let runner = CliRunner::worker(config_path, args.debug)?;
    let environment = WorkerEnvironment::new(args.region, args.cloud_provider);
    let settings = runner.config().processor_settings(environment);
    let handler = StacWorkerHandler::from_settings(&settings)?;

    match run_stdio(&handler).await? {
        InvocationResponse::Ok(_) => Ok(Completion::Complete),
        InvocationResponse::Error(_) => Ok(Completion::Partial),
    }
}
