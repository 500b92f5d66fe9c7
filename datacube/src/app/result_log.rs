//! Per-run CSV log of chunk results.
//!
//! One row per submitted job, in submission order. Jobs that exhausted their
//! retries keep the identifying columns and leave the result columns empty.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::jobs::{ChunkJob, ChunkResult};

/// Column names, in order.
pub const RESULT_LOG_COLUMNS: [&str; 12] = [
    "tile_row",
    "tile_col",
    "year",
    "month",
    "success",
    "num_scenes",
    "start_time",
    "search_duration",
    "load_duration",
    "write_duration",
    "region",
    "cloud_provider",
];

/// CSV file `{dir}/{unix_seconds}-{backend}.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLog {
    path: PathBuf,
}

impl ResultLog {
    pub fn new(dir: &Path, backend: &str, unix_seconds: u64) -> Self {
        Self {
            path: dir.join(format!("{unix_seconds}-{backend}.csv")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the header and one row per job, creating the directory.
    pub fn write(&self, jobs: &[ChunkJob], results: &[Option<ChunkResult>]) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, render(jobs, results))
    }
}

/// Renders the CSV document.
pub fn render(jobs: &[ChunkJob], results: &[Option<ChunkResult>]) -> String {
    let mut out = RESULT_LOG_COLUMNS.join(",");
    out.push('\n');
    for (job, result) in jobs.iter().zip(results) {
        out.push_str(&row(job, result.as_ref()));
        out.push('\n');
    }
    out
}

fn row(job: &ChunkJob, result: Option<&ChunkResult>) -> String {
    let mut line = String::new();
    let _ = write!(line, "{},{},{},{}", job.tile.row, job.tile.col, job.year, job.month);
    match result {
        Some(r) => {
            let _ = write!(
                line,
                ",{},{},{},{},{},{},{},{}",
                r.success,
                r.num_scenes,
                r.start_time,
                r.search_duration,
                r.load_duration,
                r.write_duration,
                escape(r.region.as_deref().unwrap_or("")),
                escape(r.cloud_provider.as_deref().unwrap_or("")),
            );
        }
        None => line.push_str(",,,,,,,,"),
    }
    line
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CubeConfig, Extent, Period, TileIndex};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn job(row: usize, col: usize) -> ChunkJob {
        let config = CubeConfig::new(
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            Extent::new(0.0, 0.0, 1.0, 1.0),
        );
        ChunkJob::new(Arc::new(config), TileIndex::new(row, col), Period::new(2021, 3))
    }

    fn result() -> ChunkResult {
        ChunkResult {
            success: true,
            num_scenes: 4,
            start_time: 1700000000.5,
            search_duration: 1.25,
            load_duration: 2.5,
            write_duration: 0.75,
            region: Some("us-west-2".to_string()),
            cloud_provider: Some("aws".to_string()),
        }
    }

    #[test]
    fn test_path_is_named_by_time_and_backend() {
        let log = ResultLog::new(Path::new("logs"), "local", 1700000000);
        assert_eq!(log.path(), Path::new("logs/1700000000-local.csv"));
    }

    #[test]
    fn test_render_rows() {
        let csv = render(&[job(0, 1), job(2, 3)], &[Some(result()), None]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RESULT_LOG_COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "0,1,2021,3,true,4,1700000000.5,1.25,2.5,0.75,us-west-2,aws"
        );
        assert_eq!(lines[2], "2,3,2021,3,,,,,,,,");
        assert_eq!(lines[2].split(',').count(), RESULT_LOG_COLUMNS.len());
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_write_creates_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = ResultLog::new(&dir.path().join("nested/logs"), "http", 1);
        log.write(&[job(0, 0)], &[None]).unwrap();
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
