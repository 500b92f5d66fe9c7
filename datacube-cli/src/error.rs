//! CLI error handling with user-friendly messages.
//!
//! Every command returns `Result<_, CliError>`; `main` turns an error into a
//! message on stderr and exit code 1.

use std::fmt;
use std::process;

use datacube::app::BuildError;
use datacube::config::ConfigFileError;
use datacube::executor::InvokeError;
use datacube::landmask::LandMaskError;
use datacube::storage::StorageError;
use datacube::worker::WorkerError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid combination of flags and config
    Config(String),
    /// Unreadable or invalid config file
    ConfigFile(ConfigFileError),
    /// Land mask could not be loaded
    LandMask(LandMaskError),
    /// Store could not be opened
    Storage(StorageError),
    /// Execution backend could not be created
    Backend(InvokeError),
    /// Worker entry point failed
    Worker(WorkerError),
    /// Build aborted
    Build(BuildError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Build(BuildError::Storage(StorageError::MissingArray(_))) => {
                eprintln!();
                eprintln!("The target array does not exist yet.");
                eprintln!("Run once without --no-initialize to create the schema.");
            }
            CliError::Config(_) | CliError::ConfigFile(_) => {
                eprintln!();
                eprintln!(
                    "Settings are read from {} unless --config is given.",
                    datacube::config::config_file_path().display()
                );
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::LandMask(e) => write!(f, "Failed to load land mask: {}", e),
            CliError::Storage(e) => write!(f, "Failed to open store: {}", e),
            CliError::Backend(e) => write!(f, "Failed to create backend: {}", e),
            CliError::Worker(e) => write!(f, "Worker error: {}", e),
            CliError::Build(e) => write!(f, "Build failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::LandMask(e) => Some(e),
            CliError::Storage(e) => Some(e),
            CliError::Backend(e) => Some(e),
            CliError::Worker(e) => Some(e),
            CliError::Build(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<LandMaskError> for CliError {
    fn from(e: LandMaskError) -> Self {
        CliError::LandMask(e)
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Storage(e)
    }
}

impl From<InvokeError> for CliError {
    fn from(e: InvokeError) -> Self {
        CliError::Backend(e)
    }
}

impl From<WorkerError> for CliError {
    fn from(e: WorkerError) -> Self {
        CliError::Worker(e)
    }
}

impl From<BuildError> for CliError {
    fn from(e: BuildError) -> Self {
        CliError::Build(e)
    }
}
