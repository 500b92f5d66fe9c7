//! Common types and utilities shared across CLI commands.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use datacube::config::ConfigFile;
use datacube::executor::{Backend, BackendKind, HttpBackend, LocalBackend, ProcessBackend};
use datacube::landmask::{AllLand, GeoJsonLandMask, LandMask};
use datacube::processor::WorkerEnvironment;
use datacube::storage::{open_store, CubeStore, StorageKind};
use datacube::worker::StacWorkerHandler;
use tracing::{info, warn};

use crate::error::CliError;

/// Environment variable naming the region workers run in.
pub const REGION_ENV: &str = "DATACUBE_REGION";

/// Environment variable naming the cloud provider workers run on.
pub const CLOUD_PROVIDER_ENV: &str = "DATACUBE_CLOUD_PROVIDER";

/// Where a resolved setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingSource {
    Flag,
    /// Config file, or its default when the key is absent
    Config,
}

impl fmt::Display for SettingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingSource::Flag => write!(f, "flag"),
            SettingSource::Config => write!(f, "config"),
        }
    }
}

/// The CLI value when given, otherwise the configured one.
pub fn resolve_setting<F: Into<T>, T>(flag: Option<F>, config: T) -> (T, SettingSource) {
    match flag {
        Some(value) => (value.into(), SettingSource::Flag),
        None => (config, SettingSource::Config),
    }
}

/// Execution backend from `--backend` or `[executor] backend`.
pub fn resolve_backend_kind(cli_backend: Option<BackendType>, config: &ConfigFile) -> BackendKind {
    let (kind, source) = resolve_setting(cli_backend, config.executor.backend);
    info!(backend = %kind, source = %source, "Execution backend selected");
    kind
}

/// Execution backend selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum BackendType {
    /// Tokio tasks inside this process
    Local,
    /// One `datacube worker` subprocess per chunk
    Process,
    /// POST to a `datacube serve` endpoint
    Http,
}

impl From<BackendType> for BackendKind {
    fn from(backend: BackendType) -> Self {
        match backend {
            BackendType::Local => BackendKind::Local,
            BackendType::Process => BackendKind::Process,
            BackendType::Http => BackendKind::Http,
        }
    }
}

/// Storage backend selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum StorageType {
    /// Zarr directory written in place; commit is a no-op
    Plain,
    /// Snapshot repository; commit publishes atomically
    Versioned,
}

impl From<StorageType> for StorageKind {
    fn from(storage: StorageType) -> Self {
        match storage {
            StorageType::Plain => StorageKind::Plain,
            StorageType::Versioned => StorageKind::Versioned,
        }
    }
}

/// Open the destination store from CLI args and config.
pub fn resolve_store(
    cli_storage: Option<StorageType>,
    cli_uri: Option<String>,
    config: &ConfigFile,
) -> Result<Box<dyn CubeStore>, CliError> {
    let (kind, source) = resolve_setting(cli_storage, config.storage.backend);
    let location = cli_uri
        .or_else(|| config.storage.location.clone())
        .ok_or_else(|| {
            CliError::Config(
                "No store location. Set location in the [storage] section or use --store-uri"
                    .to_string(),
            )
        })?;

    info!(storage = %kind, source = %source, location = %location, "Opening store");
    Ok(open_store(kind, &location)?)
}

/// Load the land mask, or treat every tile as land when none is given.
pub fn resolve_land_mask(path: Option<&Path>) -> Result<Box<dyn LandMask>, CliError> {
    match path {
        Some(path) => {
            let mask = GeoJsonLandMask::from_file(path)?;
            info!(
                path = %path.display(),
                polygons = mask.polygon_count(),
                "Loaded land mask"
            );
            Ok(Box::new(mask))
        }
        None => {
            warn!("No land mask given; every tile is treated as land");
            Ok(Box::new(AllLand))
        }
    }
}

/// Settings for constructing a backend, after CLI/config resolution.
pub struct BackendSettings<'a> {
    pub kind: BackendKind,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    /// Config file forwarded to worker subprocesses
    pub config_path: Option<&'a Path>,
    pub environment: WorkerEnvironment,
}

/// Create the execution backend.
pub fn create_backend(
    settings: BackendSettings<'_>,
    config: &ConfigFile,
) -> Result<Backend<StacWorkerHandler>, CliError> {
    match settings.kind {
        BackendKind::Local => {
            let processor = config.processor_settings(settings.environment);
            let handler = StacWorkerHandler::from_settings(&processor)?;
            Ok(Backend::Local(LocalBackend::new(handler)))
        }
        BackendKind::Process => {
            let mut args = Vec::new();
            if let Some(path) = settings.config_path {
                args.push("--config".to_string());
                args.push(path.display().to_string());
            }
            args.push("worker".to_string());

            let mut backend = match &config.executor.worker_program {
                Some(program) => ProcessBackend::new(program),
                None => ProcessBackend::current_exe()?,
            }
            .with_args(args)
            .with_timeout(Duration::from_secs(settings.timeout_secs));

            if let Some(region) = settings.environment.region {
                backend = backend.with_env(REGION_ENV, region);
            }
            if let Some(provider) = settings.environment.cloud_provider {
                backend = backend.with_env(CLOUD_PROVIDER_ENV, provider);
            }
            Ok(Backend::Process(backend))
        }
        BackendKind::Http => {
            let endpoint = settings.endpoint.ok_or_else(|| {
                CliError::Config(
                    "The http backend requires an endpoint. \
                     Set endpoint in the [executor] section or use --endpoint"
                        .to_string(),
                )
            })?;
            Ok(Backend::Http(HttpBackend::connect(
                endpoint,
                settings.timeout_secs,
            )?))
        }
    }
}
