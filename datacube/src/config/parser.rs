//! INI parsing: `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use crate::grid::MAX_TIME_FREQUENCY_MONTHS;
use super::settings::ConfigFile;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses `key` of `props` when present and non-empty.
fn parse<T: FromStr>(
    props: &Properties,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<Option<T>, ConfigFileError> {
    match props.get(key).map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| invalid(section, key, v, reason)),
    }
}

fn text(props: &Properties, key: &str) -> Option<String> {
    props
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn positive<T: FromStr + PartialOrd + Default + Copy>(
    props: &Properties,
    section: &str,
    key: &str,
) -> Result<Option<T>, ConfigFileError> {
    let value: Option<T> = parse(props, section, key, "must be a positive number")?;
    match value {
        Some(v) if v <= T::default() => Err(invalid(
            section,
            key,
            props.get(key).unwrap_or_default(),
            "must be a positive number",
        )),
        other => Ok(other),
    }
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Starts from `ConfigFile::default()` and overlays the values found in `ini`.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [catalog]
    if let Some(s) = ini.section(Some("catalog")) {
        if let Some(v) = text(s, "url") {
            config.catalog.url = v;
        }
        if let Some(v) = text(s, "collection") {
            config.catalog.collection = v;
        }
        if let Some(v) = positive(s, "catalog", "search_limit")? {
            config.catalog.search_limit = v;
        }
        if let Some(v) = positive(s, "catalog", "io_concurrency")? {
            config.catalog.io_concurrency = v;
        }
        if let Some(v) = positive(s, "catalog", "max_window_mb")? {
            config.catalog.max_window_mb = v;
        }
        if let Some(v) = positive(s, "catalog", "http_timeout_secs")? {
            config.catalog.http_timeout_secs = v;
        }
    }

    // [processing]
    if let Some(s) = ini.section(Some("processing")) {
        if let Some(v) = positive(s, "processing", "resolution")? {
            config.processing.resolution = v;
        }
        if let Some(v) = positive(s, "processing", "chunk_size")? {
            config.processing.chunk_size = v;
        }
        if let Some(v) = positive::<u32>(s, "processing", "time_frequency_months")? {
            if v > MAX_TIME_FREQUENCY_MONTHS {
                return Err(invalid(
                    "processing",
                    "time_frequency_months",
                    &v.to_string(),
                    "must be between 1 and 24",
                ));
            }
            config.processing.time_frequency_months = v;
        }
        if let Some(v) = text(s, "bands") {
            let bands = list(&v);
            if bands.is_empty() {
                return Err(invalid("processing", "bands", &v, "must list at least one band"));
            }
            config.processing.bands = bands;
        }
        if let Some(v) = text(s, "varname") {
            config.processing.varname = v;
        }
        if let Some(v) = parse(s, "processing", "epsg", "must be an EPSG code")? {
            config.processing.epsg = v;
        }
        if let Some(v) = parse(s, "processing", "mask_radius", "must be a whole number of pixels")? {
            config.processing.mask_radius = v;
        }
        if let Some(v) = text(s, "clear_classes") {
            config.processing.clear_classes = list(&v)
                .iter()
                .map(|c| c.parse::<u16>())
                .collect::<Result<_, _>>()
                .map_err(|_| {
                    invalid(
                        "processing",
                        "clear_classes",
                        &v,
                        "must be a comma-separated list of class values",
                    )
                })?;
        }
    }

    // [executor]
    if let Some(s) = ini.section(Some("executor")) {
        if let Some(v) = parse(s, "executor", "backend", "must be one of: local, process, http")? {
            config.executor.backend = v;
        }
        if let Some(v) = text(s, "endpoint") {
            config.executor.endpoint = Some(v);
        }
        if let Some(v) = text(s, "worker_program") {
            config.executor.worker_program = Some(expand_tilde(&v));
        }
        if let Some(v) = parse(s, "executor", "retries", "must be a non-negative integer")? {
            config.executor.retries = v;
        }
        if let Some(v) = positive(s, "executor", "max_in_flight")? {
            config.executor.max_in_flight = v;
        }
        if let Some(v) = positive(s, "executor", "timeout_secs")? {
            config.executor.timeout_secs = v;
        }
        if let Some(v) = parse(
            s,
            "executor",
            "commit_policy",
            "must be always, all-succeeded or partial:<ratio>",
        )? {
            config.executor.commit_policy = v;
        }
    }

    // [storage]
    if let Some(s) = ini.section(Some("storage")) {
        if let Some(v) = parse(s, "storage", "backend", "must be plain or versioned")? {
            config.storage.backend = v;
        }
        if let Some(v) = text(s, "location") {
            config.storage.location = Some(v);
        }
    }

    // [logging]
    if let Some(s) = ini.section(Some("logging")) {
        if let Some(v) = text(s, "directory") {
            config.logging.directory = expand_tilde(&v);
        }
        if let Some(v) = text(s, "file") {
            config.logging.file = v;
        }
        if let Some(v) = text(s, "level") {
            let v = v.to_lowercase();
            if !LOG_LEVELS.contains(&v.as_str()) {
                return Err(invalid(
                    "logging",
                    "level",
                    &v,
                    "must be one of: trace, debug, info, warn, error",
                ));
            }
            config.logging.level = v;
        }
        if let Some(v) = text(s, "results_directory") {
            config.logging.results_directory = expand_tilde(&v);
        }
    }

    Ok(config)
}
