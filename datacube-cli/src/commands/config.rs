//! Config command - show where settings come from and what they resolve to.

use std::path::Path;

use clap::Subcommand;
use datacube::config::{config_file_path, ConfigFile};

use super::Completion;
use crate::error::CliError;
use crate::runner::load_config;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the default config file path
    Path,
    /// Print the effective settings
    Show,
}

/// Run a config subcommand.
pub fn run(action: ConfigAction, config_path: Option<&Path>) -> Result<Completion, CliError> {
    match action {
        ConfigAction::Path => {
            println!("{}", config_file_path().display());
        }
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            print!("{}", render(&config));
        }
    }
    Ok(Completion::Complete)
}

fn optional(value: &Option<impl std::fmt::Display>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

/// Renders `config` in INI layout.
fn render(config: &ConfigFile) -> String {
    let c = config;
    let mut out = String::new();
    out.push_str("[catalog]\n");
    out.push_str(&format!("url = {}\n", c.catalog.url));
    out.push_str(&format!("collection = {}\n", c.catalog.collection));
    out.push_str(&format!("search_limit = {}\n", c.catalog.search_limit));
    out.push_str(&format!("io_concurrency = {}\n", c.catalog.io_concurrency));
    out.push_str(&format!("max_window_mb = {}\n", c.catalog.max_window_mb));
    out.push_str(&format!("http_timeout_secs = {}\n", c.catalog.http_timeout_secs));

    out.push_str("\n[processing]\n");
    out.push_str(&format!("resolution = {}\n", c.processing.resolution));
    out.push_str(&format!("chunk_size = {}\n", c.processing.chunk_size));
    out.push_str(&format!(
        "time_frequency_months = {}\n",
        c.processing.time_frequency_months
    ));
    out.push_str(&format!("bands = {}\n", c.processing.bands.join(",")));
    out.push_str(&format!("varname = {}\n", c.processing.varname));
    out.push_str(&format!("epsg = {}\n", c.processing.epsg));
    out.push_str(&format!("mask_radius = {}\n", c.processing.mask_radius));
    let classes: Vec<String> = c
        .processing
        .clear_classes
        .iter()
        .map(|v| v.to_string())
        .collect();
    out.push_str(&format!("clear_classes = {}\n", classes.join(",")));

    out.push_str("\n[executor]\n");
    out.push_str(&format!("backend = {}\n", c.executor.backend));
    out.push_str(&format!("endpoint = {}\n", optional(&c.executor.endpoint)));
    out.push_str(&format!(
        "worker_program = {}\n",
        optional(&c.executor.worker_program.as_ref().map(|p| p.display()))
    ));
    out.push_str(&format!("retries = {}\n", c.executor.retries));
    out.push_str(&format!("max_in_flight = {}\n", c.executor.max_in_flight));
    out.push_str(&format!("timeout_secs = {}\n", c.executor.timeout_secs));
    out.push_str(&format!("commit_policy = {}\n", c.executor.commit_policy));

    out.push_str("\n[storage]\n");
    out.push_str(&format!("backend = {}\n", c.storage.backend));
    out.push_str(&format!("location = {}\n", optional(&c.storage.location)));

    out.push_str("\n[logging]\n");
    out.push_str(&format!("directory = {}\n", c.logging.directory.display()));
    out.push_str(&format!("file = {}\n", c.logging.file));
    out.push_str(&format!("level = {}\n", c.logging.level));
    out.push_str(&format!(
        "results_directory = {}\n",
        c.logging.results_directory.display()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_round_trips_through_loader() {
        let mut config = ConfigFile::default();
        config.executor.retries = 9;
        config.storage.location = Some("/data/cube".to_string());

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        // unset optionals render as a placeholder; drop those lines
        let text: String = render(&config)
            .lines()
            .filter(|l| !l.ends_with("(not set)"))
            .map(|l| format!("{l}\n"))
            .collect();
        std::fs::write(&path, text).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.executor.retries, 9);
        assert_eq!(loaded.storage.location.as_deref(), Some("/data/cube"));
        assert_eq!(loaded.processing, config.processing);
    }
}
