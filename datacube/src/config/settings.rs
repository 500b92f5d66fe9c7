//! Settings structs, one per `[section]` of `config.ini`.

use std::path::PathBuf;

use crate::catalog::{DEFAULT_CATALOG_URL, DEFAULT_COLLECTION, DEFAULT_SEARCH_LIMIT};
use crate::composite::{MaskSettings, DEFAULT_MASK_RADIUS, SCL_NOT_VEGETATED, SCL_VEGETATION};
use crate::executor::{
    BackendKind, CommitPolicy, DEFAULT_MAX_IN_FLIGHT, DEFAULT_PROCESS_TIMEOUT_SECS,
    DEFAULT_RETRIES,
};
use crate::grid::{
    DEFAULT_BANDS, DEFAULT_CHUNK_SIZE, DEFAULT_RESOLUTION, DEFAULT_TIME_FREQUENCY_MONTHS,
    DEFAULT_VARNAME, SUPPORTED_EPSG,
};
use crate::http::DEFAULT_HTTP_TIMEOUT_SECS;
use crate::loader::{DEFAULT_IO_CONCURRENCY, DEFAULT_MAX_WINDOW_BYTES};
use crate::logging::{DEFAULT_LOG_DIR, DEFAULT_LOG_FILE, DEFAULT_LOG_LEVEL};
use crate::processor::WorkerEnvironment;
use crate::storage::StorageKind;
use crate::worker::ProcessorSettings;

/// Complete configuration loaded from `config.ini`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub catalog: CatalogSettings,
    pub processing: ProcessingSettings,
    pub executor: ExecutorSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// `[catalog]`: scene search and band download.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSettings {
    /// STAC API root
    pub url: String,
    pub collection: String,
    /// Items requested per search page
    pub search_limit: usize,
    /// Concurrent band downloads per chunk
    pub io_concurrency: usize,
    /// Largest decoded source window per asset, in MiB
    pub max_window_mb: usize,
    pub http_timeout_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            io_concurrency: DEFAULT_IO_CONCURRENCY,
            max_window_mb: DEFAULT_MAX_WINDOW_BYTES / (1024 * 1024),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

/// `[processing]`: cube layout defaults and cloud masking.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingSettings {
    pub resolution: f64,
    pub chunk_size: usize,
    pub time_frequency_months: u32,
    pub bands: Vec<String>,
    pub varname: String,
    pub epsg: u32,
    /// Disk radius of the mask closing and opening
    pub mask_radius: usize,
    /// Scene classes treated as clear
    pub clear_classes: Vec<u16>,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            time_frequency_months: DEFAULT_TIME_FREQUENCY_MONTHS,
            bands: DEFAULT_BANDS.iter().map(|b| b.to_string()).collect(),
            varname: DEFAULT_VARNAME.to_string(),
            epsg: SUPPORTED_EPSG,
            mask_radius: DEFAULT_MASK_RADIUS,
            clear_classes: vec![SCL_VEGETATION, SCL_NOT_VEGETATED],
        }
    }
}

/// `[executor]`: backend selection, retries and commit policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    pub backend: BackendKind,
    /// Base URL of the function service (http backend)
    pub endpoint: Option<String>,
    /// Worker executable (process backend); defaults to the running binary
    pub worker_program: Option<PathBuf>,
    pub retries: u32,
    pub max_in_flight: usize,
    /// Per-invocation timeout
    pub timeout_secs: u64,
    pub commit_policy: CommitPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            endpoint: None,
            worker_program: None,
            retries: DEFAULT_RETRIES,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout_secs: DEFAULT_PROCESS_TIMEOUT_SECS,
            commit_policy: CommitPolicy::default(),
        }
    }
}

/// `[storage]`: destination store.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub backend: StorageKind,
    /// Path or `file://` URI
    pub location: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageKind::Plain,
            location: None,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
    pub level: String,
    /// Where per-run CSV result logs go
    pub results_directory: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LOG_DIR),
            file: DEFAULT_LOG_FILE.to_string(),
            level: DEFAULT_LOG_LEVEL.to_string(),
            results_directory: PathBuf::from(crate::app::DEFAULT_RESULTS_DIR),
        }
    }
}

impl ConfigFile {
    pub fn mask_settings(&self) -> MaskSettings {
        MaskSettings {
            clear_classes: self.processing.clear_classes.clone(),
            closing_radius: self.processing.mask_radius,
            opening_radius: self.processing.mask_radius,
        }
    }

    /// Worker settings for this configuration running in `environment`.
    pub fn processor_settings(&self, environment: WorkerEnvironment) -> ProcessorSettings {
        ProcessorSettings {
            catalog_url: self.catalog.url.clone(),
            collection: self.catalog.collection.clone(),
            search_limit: self.catalog.search_limit,
            io_concurrency: self.catalog.io_concurrency,
            max_window_bytes: self.catalog.max_window_mb.saturating_mul(1024 * 1024),
            http_timeout_secs: self.catalog.http_timeout_secs,
            mask: self.mask_settings(),
            environment,
        }
    }
}
