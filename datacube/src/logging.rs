//! Logging setup.
//!
//! - Writes to `{log_dir}/{log_file}` (cleared on start)
//! - Mirrors to the console; stderr for workers, whose stdout carries the
//!   result document
//! - `RUST_LOG` overrides the default level

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default directory for the log file.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "datacube.log";

/// Default level when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Where console output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initializes the global subscriber with a file layer and a console layer.
///
/// # Errors
///
/// Returns an error if the log directory or file cannot be created, or if a
/// global subscriber is already installed.
pub fn init_logging(
    log_dir: &Path,
    log_file: &str,
    default_level: &str,
    console: Console,
) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);

    let console_writer = match console {
        Console::Stdout => BoxMakeWriter::new(io::stdout),
        Console::Stderr => BoxMakeWriter::new(io::stderr),
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(console_writer)
        .with_ansi(console == Console::Stdout)
        .compact();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Initializes console-only logging.
///
/// Used by short-lived worker processes, many of which may run at once and
/// must not share (or truncate) one log file.
pub fn init_console_logging(default_level: &str, console: Console) -> Result<(), io::Error> {
    let writer = match console {
        Console::Stdout => BoxMakeWriter::new(io::stdout),
        Console::Stderr => BoxMakeWriter::new(io::stderr),
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))
}

/// `debug` when verbose output was requested, otherwise `level`.
pub fn level_for(debug: bool, level: &str) -> &str {
    if debug {
        "debug"
    } else {
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(true, "warn"), "debug");
        assert_eq!(level_for(false, "warn"), "warn");
    }

    #[test]
    fn test_init_creates_and_clears_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");
        std::fs::create_dir_all(&log_dir).unwrap();
        std::fs::write(log_dir.join(DEFAULT_LOG_FILE), "old log data").unwrap();

        // A second global subscriber in the same test binary is refused, but
        // the file is prepared before that check.
        let _guard = init_logging(&log_dir, DEFAULT_LOG_FILE, "info", Console::Stderr);

        let content = std::fs::read_to_string(log_dir.join(DEFAULT_LOG_FILE)).unwrap();
        assert!(!content.contains("old log data"));
    }
}
