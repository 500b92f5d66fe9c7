//! User configuration from an INI file.
//!
//! Settings live in [`settings`], parsing in `parser`, loading in [`file`].
//! Command-line flags override whatever the file sets.
//!
//! # Example
//!
//! ```ignore
//! use datacube::config::ConfigFile;
//!
//! let config = ConfigFile::load()?;
//! let retries = config.executor.retries;
//! ```

pub mod file;
mod parser;
pub mod settings;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    CatalogSettings, ConfigFile, ExecutorSettings, LoggingSettings, ProcessingSettings,
    StorageSettings,
};
