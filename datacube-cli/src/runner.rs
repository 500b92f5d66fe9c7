//! CLI runner for common setup.
//!
//! Loads the config file and initializes logging so command handlers start
//! from a ready [`ConfigFile`].

use std::path::Path;

use datacube::config::ConfigFile;
use datacube::logging::{init_console_logging, init_logging, level_for, Console, LoggingGuard};
use tracing::info;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Keeps file logging active while the runner exists
    _logging_guard: Option<LoggingGuard>,
    config: ConfigFile,
}

/// Loads `path` if given (it must exist), otherwise the default config file.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    match path {
        Some(path) if !path.exists() => Err(CliError::Config(format!(
            "config file {} does not exist",
            path.display()
        ))),
        Some(path) => Ok(ConfigFile::load_from(path)?),
        None => Ok(ConfigFile::load()?),
    }
}

impl CliRunner {
    /// Runner that logs to the configured file and to stdout.
    pub fn new(config_path: Option<&Path>, debug: bool) -> Result<Self, CliError> {
        let config = load_config(config_path)?;
        let level = level_for(debug, &config.logging.level);
        let guard = init_logging(
            &config.logging.directory,
            &config.logging.file,
            level,
            Console::Stdout,
        )
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: Some(guard),
            config,
        })
    }

    /// Runner for a single worker invocation: logs to stderr only.
    ///
    /// Stdout is reserved for the result document.
    pub fn worker(config_path: Option<&Path>, debug: bool) -> Result<Self, CliError> {
        let config = load_config(config_path)?;
        init_console_logging(level_for(debug, &config.logging.level), Console::Stderr)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: None,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("Datacube v{}", datacube::VERSION);
        info!("Datacube CLI: {} command", command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_config(Some(&dir.path().join("missing.ini")));
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn test_explicit_config_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[executor]\nretries = 7\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.executor.retries, 7);
    }
}
