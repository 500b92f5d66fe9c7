//! Chunk jobs, their results, and the lazy job generator.
//!
//! A [`ChunkJob`] names one tile and one time period of the cube. Every job
//! maps to its own [`WriteRegion`] of the output array; regions of distinct
//! jobs never overlap, which is what lets workers write concurrently without
//! coordination.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use datacube::jobs::JobGenerator;
//! use datacube::landmask::AllLand;
//!
//! let jobs: Vec<_> = JobGenerator::new(Arc::new(config), &AllLand)
//!     .with_limit(Some(10))
//!     .collect();
//! ```

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::grid::{CubeConfig, Extent, GeoBox, Period, TileIndex};
use crate::landmask::LandMask;

// =============================================================================
// Job
// =============================================================================

/// One spatio-temporal chunk of the cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkJob {
    pub config: Arc<CubeConfig>,
    pub tile: TileIndex,
    pub year: i32,
    pub month: u32,
}

impl ChunkJob {
    pub fn new(config: Arc<CubeConfig>, tile: TileIndex, period: Period) -> Self {
        Self {
            config,
            tile,
            year: period.year,
            month: period.month,
        }
    }

    pub fn period(&self) -> Period {
        Period::new(self.year, self.month)
    }

    /// Inclusive calendar interval searched for scenes.
    pub fn interval(&self) -> (NaiveDate, NaiveDate) {
        self.period().interval(self.config.time_frequency_months())
    }

    pub fn datetime_range(&self) -> String {
        self.period()
            .datetime_range(self.config.time_frequency_months())
    }

    pub fn time_index(&self) -> usize {
        self.config.time_index(&self.period())
    }

    /// Pixel grid the chunk is computed on.
    pub fn geobox(&self) -> GeoBox {
        self.config.tiles().tile_geobox(self.tile)
    }

    /// Geographic footprint of the tile.
    pub fn footprint(&self) -> Extent {
        self.geobox().extent()
    }

    /// Range of the output array this job writes.
    pub fn write_region(&self) -> WriteRegion {
        let tiles = self.config.tiles();
        let (row, col) = tiles.offset(self.tile);
        let geobox = tiles.tile_geobox(self.tile);
        let time = self.time_index();
        WriteRegion {
            time: time..time + 1,
            rows: row..row + geobox.height,
            cols: col..col + geobox.width,
            bands: 0..self.config.bands().len(),
        }
    }
}

impl fmt::Display for ChunkJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile {} @ {}", self.tile, self.period())
    }
}

// =============================================================================
// Write region
// =============================================================================

/// Half-open index ranges along `(time, latitude, longitude, band)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteRegion {
    pub time: Range<usize>,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
    pub bands: Range<usize>,
}

fn ranges_overlap(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

impl WriteRegion {
    /// Ranges in array dimension order, as `u64` for the storage layer.
    pub fn ranges(&self) -> [Range<u64>; 4] {
        let cast = |r: &Range<usize>| r.start as u64..r.end as u64;
        [
            cast(&self.time),
            cast(&self.rows),
            cast(&self.cols),
            cast(&self.bands),
        ]
    }

    /// `(height, width, bands)` of the data written into this region.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows.len(), self.cols.len(), self.bands.len())
    }

    pub fn element_count(&self) -> usize {
        self.time.len() * self.rows.len() * self.cols.len() * self.bands.len()
    }

    pub fn overlaps(&self, other: &WriteRegion) -> bool {
        ranges_overlap(&self.time, &other.time)
            && ranges_overlap(&self.rows, &other.rows)
            && ranges_overlap(&self.cols, &other.cols)
            && ranges_overlap(&self.bands, &other.bands)
    }
}

// =============================================================================
// Result
// =============================================================================

/// Outcome of one job run that completed, with or without data.
///
/// Durations are in seconds; `start_time` is seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub success: bool,
    pub num_scenes: usize,
    pub start_time: f64,
    pub search_duration: f64,
    pub load_duration: f64,
    pub write_duration: f64,
    pub region: Option<String>,
    pub cloud_provider: Option<String>,
}

impl ChunkResult {
    /// A catalog search that matched nothing.
    pub fn no_data(start_time: f64, search_duration: f64) -> Self {
        Self {
            success: false,
            num_scenes: 0,
            start_time,
            search_duration,
            load_duration: 0.0,
            write_duration: 0.0,
            region: None,
            cloud_provider: None,
        }
    }

    pub fn with_environment(mut self, region: Option<String>, cloud_provider: Option<String>) -> Self {
        self.region = region;
        self.cloud_provider = cloud_provider;
        self
    }

    pub fn total_duration(&self) -> f64 {
        self.search_duration + self.load_duration + self.write_duration
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Lazily yields jobs for every land tile and period, tile-major.
///
/// Each tile is tested against the land mask once, when the generator first
/// reaches it.
pub struct JobGenerator<'a> {
    config: Arc<CubeConfig>,
    mask: &'a dyn LandMask,
    tiles: Box<dyn Iterator<Item = TileIndex> + 'a>,
    periods: Vec<Period>,
    current: Option<TileIndex>,
    next_period: usize,
    limit: Option<usize>,
    yielded: usize,
    skipped_tiles: usize,
}

impl<'a> JobGenerator<'a> {
    pub fn new(config: Arc<CubeConfig>, mask: &'a dyn LandMask) -> Self {
        let tiles = Box::new(config.tiles().indices());
        let periods = config.periods();
        Self {
            config,
            mask,
            tiles,
            periods,
            current: None,
            next_period: 0,
            limit: None,
            yielded: 0,
            skipped_tiles: 0,
        }
    }

    /// Caps the total number of jobs yielded.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Ocean tiles passed over so far.
    pub fn skipped_tiles(&self) -> usize {
        self.skipped_tiles
    }

    fn advance_tile(&mut self) -> Option<TileIndex> {
        let tiles = self.config.tiles();
        for tile in self.tiles.by_ref() {
            if self.mask.intersects(&tiles.tile_extent(tile)) {
                return Some(tile);
            }
            self.skipped_tiles += 1;
            tracing::trace!(%tile, "Skipping ocean tile");
        }
        None
    }
}

impl Iterator for JobGenerator<'_> {
    type Item = ChunkJob;

    fn next(&mut self) -> Option<ChunkJob> {
        if self.limit.is_some_and(|limit| self.yielded >= limit) || self.periods.is_empty() {
            return None;
        }

        if self.current.is_none() || self.next_period >= self.periods.len() {
            self.current = Some(self.advance_tile()?);
            self.next_period = 0;
        }

        let tile = self.current?;
        let period = self.periods[self.next_period];
        self.next_period += 1;
        self.yielded += 1;
        Some(ChunkJob::new(Arc::clone(&self.config), tile, period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Extent;
    use crate::landmask::AllLand;

    fn config() -> Arc<CubeConfig> {
        // 20 x 20 pixels at 0.1 degrees, 10-pixel tiles: 2 x 2 tiles.
        Arc::new(
            CubeConfig::new(
                NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
                Extent::new(0.0, 0.0, 2.0, 2.0),
            )
            .with_resolution(0.1)
            .with_chunk_size(10),
        )
    }

    /// Land only in the north-west quadrant.
    struct NorthWestOnly;

    impl LandMask for NorthWestOnly {
        fn intersects(&self, extent: &Extent) -> bool {
            extent.min_lon < 1.0 && extent.max_lat > 1.0 + 1e-9
        }
    }

    #[test]
    fn test_generates_tile_major_jobs() {
        let jobs: Vec<_> = JobGenerator::new(config(), &AllLand).collect();
        assert_eq!(jobs.len(), 8);
        assert_eq!(jobs[0].tile, TileIndex::new(0, 0));
        assert_eq!(jobs[0].period(), Period::new(2020, 1));
        assert_eq!(jobs[1].tile, TileIndex::new(0, 0));
        assert_eq!(jobs[1].period(), Period::new(2020, 2));
        assert_eq!(jobs[2].tile, TileIndex::new(0, 1));
    }

    #[test]
    fn test_skips_ocean_tiles() {
        let mut generator = JobGenerator::new(config(), &NorthWestOnly);
        let jobs: Vec<_> = generator.by_ref().collect();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.tile == TileIndex::new(0, 0)));
        assert_eq!(generator.skipped_tiles(), 3);
    }

    #[test]
    fn test_limit_caps_jobs() {
        let jobs: Vec<_> = JobGenerator::new(config(), &AllLand)
            .with_limit(Some(3))
            .collect();
        assert_eq!(jobs.len(), 3);

        let none: Vec<_> = JobGenerator::new(config(), &AllLand)
            .with_limit(Some(0))
            .collect();
        assert!(none.is_empty());
    }

    #[test]
    fn test_write_region_for_tile_and_period() {
        let job = ChunkJob::new(config(), TileIndex::new(1, 0), Period::new(2020, 2));
        let region = job.write_region();
        assert_eq!(region.time, 1..2);
        assert_eq!(region.rows, 10..20);
        assert_eq!(region.cols, 0..10);
        assert_eq!(region.bands, 0..3);
        assert_eq!(region.element_count(), 300);
    }

    #[test]
    fn test_jobs_write_disjoint_regions() {
        let jobs: Vec<_> = JobGenerator::new(config(), &AllLand).collect();
        for (i, a) in jobs.iter().enumerate() {
            for b in &jobs[i + 1..] {
                assert!(!a.write_region().overlaps(&b.write_region()), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn test_job_interval_and_footprint() {
        let job = ChunkJob::new(config(), TileIndex::new(0, 1), Period::new(2020, 2));
        assert_eq!(job.datetime_range(), "2020-02-01/2020-02-29");
        let footprint = job.footprint();
        assert!((footprint.min_lon - 1.0).abs() < 1e-9);
        assert!((footprint.max_lat - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_job_serializes_with_config() {
        let job = ChunkJob::new(config(), TileIndex::new(1, 1), Period::new(2020, 1));
        let json = serde_json::to_string(&job).unwrap();
        let back: ChunkJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
        assert_eq!(back.write_region(), job.write_region());
    }

    #[test]
    fn test_no_data_result() {
        let result = ChunkResult::no_data(1.0, 0.5);
        assert!(!result.success);
        assert_eq!(result.num_scenes, 0);
        assert_eq!(result.load_duration, 0.0);
        assert_eq!(result.write_duration, 0.0);
    }
}
