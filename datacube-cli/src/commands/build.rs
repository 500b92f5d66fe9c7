//! Build command - generate jobs, dispatch them and commit the cube.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::Args;
use datacube::app::{run_build, BuildOptions, RunSummary};
use datacube::config::ConfigFile;
use datacube::executor::{CommitPolicy, DispatchProgress, Dispatcher, ExecutionBackend, RetryPolicy};
use datacube::grid::{CubeConfig, Extent};
use datacube::processor::WorkerEnvironment;
use datacube::storage::CommitOutcome;
use indicatif::{ProgressBar, ProgressStyle};

use super::common::{
    create_backend, resolve_backend_kind, resolve_land_mask, resolve_store, BackendSettings,
    BackendType, StorageType,
    CLOUD_PROVIDER_ENV, REGION_ENV,
};
use super::Completion;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the build command.
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Start date (YYYY-MM-DD); only year and month are used
    #[arg(long)]
    pub start_date: NaiveDate,

    /// End date (YYYY-MM-DD); only year and month are used
    #[arg(long)]
    pub end_date: NaiveDate,

    /// Bounding box in degrees
    #[arg(
        long,
        num_args = 4,
        required = true,
        allow_negative_numbers = true,
        value_names = ["MIN_LON", "MIN_LAT", "MAX_LON", "MAX_LAT"]
    )]
    pub bbox: Vec<f64>,

    /// Temporal sampling frequency in months (1-24)
    #[arg(long)]
    pub time_frequency_months: Option<u32>,

    /// Spatial resolution in degrees
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Chunk (tile) size in pixels
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Bands to include, comma-separated or repeated
    #[arg(long, value_delimiter = ',')]
    pub bands: Vec<String>,

    /// Name of the data variable in the cube
    #[arg(long)]
    pub varname: Option<String>,

    /// Coordinate system of the cube (only 4326 is supported)
    #[arg(long)]
    pub epsg: Option<u32>,

    /// Execution backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendType>,

    /// Storage backend
    #[arg(long, value_enum)]
    pub storage: Option<StorageType>,

    /// Store location (path or file:// URI)
    #[arg(long)]
    pub store_uri: Option<String>,

    /// GeoJSON land polygons; ocean-only tiles are skipped
    #[arg(long)]
    pub land_mask: Option<PathBuf>,

    /// Process at most this many chunks
    #[arg(long)]
    pub limit: Option<usize>,

    /// Enable debug logging here and in workers
    #[arg(long)]
    pub debug: bool,

    /// Keep the existing store instead of resetting it and writing the schema
    #[arg(long)]
    pub no_initialize: bool,

    /// Retries per chunk after the first attempt
    #[arg(long)]
    pub retries: Option<u32>,

    /// Maximum concurrent invocations
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// When to commit: always, all-succeeded or partial:<ratio>
    #[arg(long)]
    pub commit_policy: Option<CommitPolicy>,

    /// Function service URL (http backend)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Per-invocation timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Directory for the CSV result log
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Region reported in results of local runs
    #[arg(long, env = REGION_ENV)]
    pub region: Option<String>,

    /// Cloud provider reported in results of local runs
    #[arg(long, env = CLOUD_PROVIDER_ENV)]
    pub cloud_provider: Option<String>,
}

impl BuildArgs {
    /// Cube definition: CLI flags over `[processing]` defaults.
    fn cube_config(&self, config: &ConfigFile) -> Result<CubeConfig, CliError> {
        let [min_lon, min_lat, max_lon, max_lat] = self.bbox[..] else {
            return Err(CliError::Config(format!(
                "--bbox takes 4 values, got {}",
                self.bbox.len()
            )));
        };
        let processing = &config.processing;
        let bands = if self.bands.is_empty() {
            processing.bands.clone()
        } else {
            self.bands.clone()
        };

        Ok(CubeConfig::new(
            self.start_date,
            self.end_date,
            Extent::new(min_lon, min_lat, max_lon, max_lat),
        )
        .with_resolution(self.resolution.unwrap_or(processing.resolution))
        .with_epsg(self.epsg.unwrap_or(processing.epsg))
        .with_time_frequency_months(
            self.time_frequency_months
                .unwrap_or(processing.time_frequency_months),
        )
        .with_chunk_size(self.chunk_size.unwrap_or(processing.chunk_size))
        .with_bands(bands)
        .with_varname(
            self.varname
                .clone()
                .unwrap_or_else(|| processing.varname.clone()),
        ))
    }

    fn build_options(&self, config: &ConfigFile) -> BuildOptions {
        BuildOptions {
            initialize: !self.no_initialize,
            limit: self.limit,
            debug: self.debug,
            retries: self.retries.unwrap_or(config.executor.retries),
            commit_policy: self
                .commit_policy
                .clone()
                .unwrap_or_else(|| config.executor.commit_policy.clone()),
            log_dir: self
                .log_dir
                .clone()
                .unwrap_or_else(|| config.logging.results_directory.clone()),
        }
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    bar
}

/// Run the build command.
pub async fn run(args: BuildArgs, config_path: Option<&Path>) -> Result<Completion, CliError> {
    let runner = CliRunner::new(config_path, args.debug)?;
    runner.log_startup("build");
    let config = runner.config();

    let cube = args.cube_config(config)?;
    cube.validate().map_err(|e| CliError::Build(e.into()))?;
    let options = args.build_options(config);
    let store = resolve_store(args.storage, args.store_uri.clone(), config)?;
    let land_mask = resolve_land_mask(args.land_mask.as_deref())?;

    let kind = resolve_backend_kind(args.backend, config);
    let backend = create_backend(
        BackendSettings {
            kind,
            endpoint: args
                .endpoint
                .clone()
                .or_else(|| config.executor.endpoint.clone()),
            timeout_secs: args.timeout.unwrap_or(config.executor.timeout_secs),
            config_path,
            environment: WorkerEnvironment::new(args.region.clone(), args.cloud_provider.clone()),
        },
        config,
    )?;

    let bar = progress_bar();
    let progress = {
        let bar = bar.clone();
        DispatchProgress::new().with_callback(Arc::new(move |finished, total| {
            bar.set_length(total as u64);
            bar.set_position(finished as u64);
        }))
    };
    let dispatcher = Dispatcher::new(backend)
        .with_retry_policy(RetryPolicy::from_retries(options.retries))
        .with_max_in_flight(
            args.max_in_flight
                .unwrap_or(config.executor.max_in_flight),
        )
        .with_progress(progress);

    println!("Datacube Build v{}", datacube::VERSION);
    println!("====================");
    println!();
    println!("Period:   {} to {}", args.start_date, args.end_date);
    println!("Tiles:    {}", cube.num_tiles());
    println!("Backend:  {}", dispatcher.backend().name());
    println!("Store:    {}", store.kind());
    println!("Commit:   {}", options.commit_policy);
    println!();

    let result = run_build(cube, store.as_ref(), land_mask.as_ref(), &dispatcher, &options).await;
    bar.finish_and_clear();
    let summary = result?;

    print_summary(&summary);
    Ok(if summary.is_complete() {
        Completion::Complete
    } else {
        Completion::Partial
    })
}

fn print_summary(summary: &RunSummary) {
    println!("Build Summary");
    println!("─────────────");
    println!("  Chunks:      {}", summary.total);
    println!("  Written:     {}", summary.succeeded);
    println!("  No scenes:   {}", summary.no_data);
    println!("  Failed:      {}", summary.failed);
    println!("  Ocean tiles: {}", summary.skipped_tiles);
    match &summary.commit {
        Some(CommitOutcome::Committed { id }) => println!("  Commit:      {}", id),
        Some(CommitOutcome::Unchanged) => println!("  Commit:      nothing to commit"),
        Some(CommitOutcome::NotTransactional) => println!("  Commit:      writes already visible"),
        None => println!("  Commit:      withheld by commit policy"),
    }
    println!("  Result log:  {}", summary.log_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        build: BuildArgs,
    }

    fn parse(extra: &[&str]) -> BuildArgs {
        let mut argv = vec![
            "datacube",
            "--start-date",
            "2020-01-15",
            "--end-date",
            "2020-06-01",
            "--bbox",
            "-122.5",
            "37.0",
            "-121.5",
            "38.0",
        ];
        argv.extend_from_slice(extra);
        TestCli::parse_from(argv).build
    }

    #[test]
    fn test_negative_bbox_values_parse() {
        let args = parse(&[]);
        assert_eq!(args.bbox, vec![-122.5, 37.0, -121.5, 38.0]);
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&["--chunk-size", "600", "--bands", "red,nir"]);
        let mut config = ConfigFile::default();
        config.processing.chunk_size = 300;
        config.processing.varname = "composite".to_string();

        let cube = args.cube_config(&config).unwrap();
        assert_eq!(cube.chunk_size(), 600);
        assert_eq!(cube.bands(), ["red".to_string(), "nir".to_string()]);
        assert_eq!(cube.varname(), "composite");
    }

    #[test]
    fn test_build_options_from_config() {
        let args = parse(&["--no-initialize", "--commit-policy", "partial:0.5"]);
        let mut config = ConfigFile::default();
        config.executor.retries = 4;

        let options = args.build_options(&config);
        assert!(!options.initialize);
        assert_eq!(options.retries, 4);
        assert_eq!(
            options.commit_policy,
            CommitPolicy::PartialSuccess { threshold: 0.5 }
        );
    }
}
