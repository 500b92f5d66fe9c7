//! Configuration file handling for `~/.config/datacube/config.ini`.
//!
//! A missing file is not an error: every setting has a default.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::settings::ConfigFile;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigFile {
    /// Loads the configuration from the default path.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Loads the configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }
}

/// The config directory (`~/.config/datacube`).
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("datacube")
}

/// The config file (`~/.config/datacube/config.ini`).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp_dir.path().join("nonexistent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        std::fs::write(&path, "[executor]\nretries = 0\n").unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.executor.retries, 0);
    }

    #[test]
    fn test_config_file_path_name() {
        assert!(config_file_path().ends_with("datacube/config.ini"));
    }
}
