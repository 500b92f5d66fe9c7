//! Cube configuration and its derived quantities.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::geobox::{Extent, GeoBox, TileGrid};
use super::period::Period;

// =============================================================================
// Defaults
// =============================================================================

/// One arc-second, roughly 30 m at the equator.
pub const DEFAULT_RESOLUTION: f64 = 1.0 / 3600.0;

/// Tile edge length in pixels; also the spatial chunk size of the output array.
pub const DEFAULT_CHUNK_SIZE: usize = 1200;

pub const DEFAULT_TIME_FREQUENCY_MONTHS: u32 = 1;

pub const MAX_TIME_FREQUENCY_MONTHS: u32 = 24;

pub const DEFAULT_VARNAME: &str = "rgb_median";

pub const DEFAULT_BANDS: [&str; 3] = ["red", "green", "blue"];

/// The only coordinate reference system the cube is built in.
pub const SUPPORTED_EPSG: u32 = 4326;

/// Errors from validating a [`CubeConfig`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("start date {start} is after end date {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid bounding box {0}: {1}")]
    InvalidBounds(Extent, &'static str),

    #[error("resolution must be positive, got {0}")]
    InvalidResolution(f64),

    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    #[error("time frequency must be between 1 and 24 months, got {0}")]
    InvalidFrequency(u32),

    #[error("at least one band is required")]
    NoBands,

    #[error("invalid variable name '{0}'")]
    InvalidVarname(String),

    #[error("unsupported coordinate system EPSG:{0} (only EPSG:4326 is supported)")]
    UnsupportedCrs(u32),

    #[error("grid has no land tiles to process")]
    NoLandTiles,
}

/// Immutable description of the cube being built.
///
/// Start and end dates are normalized to the first day of their month;
/// only year and month are significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeConfig {
    start_date: NaiveDate,
    end_date: NaiveDate,
    bbox: Extent,
    resolution: f64,
    epsg: u32,
    time_frequency_months: u32,
    chunk_size: usize,
    bands: Vec<String>,
    varname: String,
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

impl CubeConfig {
    /// Creates a configuration with default resolution, chunking and bands.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, bbox: Extent) -> Self {
        Self {
            start_date: month_start(start_date),
            end_date: month_start(end_date),
            bbox,
            resolution: DEFAULT_RESOLUTION,
            epsg: SUPPORTED_EPSG,
            time_frequency_months: DEFAULT_TIME_FREQUENCY_MONTHS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            bands: DEFAULT_BANDS.iter().map(|b| b.to_string()).collect(),
            varname: DEFAULT_VARNAME.to_string(),
        }
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_epsg(mut self, epsg: u32) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn with_time_frequency_months(mut self, months: u32) -> Self {
        self.time_frequency_months = months;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_bands<I, S>(mut self, bands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bands = bands.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_varname(mut self, varname: impl Into<String>) -> Self {
        self.varname = varname.into();
        self
    }

    /// Checks every field; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epsg != SUPPORTED_EPSG {
            return Err(ConfigError::UnsupportedCrs(self.epsg));
        }
        if self.start_date > self.end_date {
            return Err(ConfigError::InvertedDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }

        let b = &self.bbox;
        let values = [b.min_lon, b.min_lat, b.max_lon, b.max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidBounds(*b, "coordinates must be finite"));
        }
        if b.min_lon >= b.max_lon || b.min_lat >= b.max_lat {
            return Err(ConfigError::InvalidBounds(*b, "minimum must be below maximum"));
        }
        if b.min_lat < -90.0 || b.max_lat > 90.0 {
            return Err(ConfigError::InvalidBounds(*b, "latitude outside [-90, 90]"));
        }
        if b.min_lon < -180.0 || b.max_lon > 180.0 {
            return Err(ConfigError::InvalidBounds(*b, "longitude outside [-180, 180]"));
        }

        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(ConfigError::InvalidResolution(self.resolution));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        if !(1..=MAX_TIME_FREQUENCY_MONTHS).contains(&self.time_frequency_months) {
            return Err(ConfigError::InvalidFrequency(self.time_frequency_months));
        }
        if self.bands.is_empty() || self.bands.iter().any(|b| b.trim().is_empty()) {
            return Err(ConfigError::NoBands);
        }
        if self.varname.is_empty()
            || !self
                .varname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidVarname(self.varname.clone()));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn bbox(&self) -> &Extent {
        &self.bbox
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn time_frequency_months(&self) -> u32 {
        self.time_frequency_months
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn varname(&self) -> &str {
        &self.varname
    }

    // -------------------------------------------------------------------------
    // Derived grid
    // -------------------------------------------------------------------------

    pub fn geobox(&self) -> GeoBox {
        GeoBox::from_extent(&self.bbox, self.resolution)
    }

    pub fn tiles(&self) -> TileGrid {
        TileGrid::new(self.geobox(), self.chunk_size)
    }

    pub fn num_tiles(&self) -> usize {
        self.tiles().len()
    }

    /// Period start months, every `time_frequency_months` from the start
    /// month up to and including the end month.
    pub fn periods(&self) -> Vec<Period> {
        let step = Months::new(self.time_frequency_months.max(1));
        let mut periods = Vec::new();
        let mut current = Some(self.start_date);
        while let Some(date) = current.filter(|d| *d <= self.end_date) {
            periods.push(Period::from_date(date));
            current = date.checked_add_months(step);
        }
        periods
    }

    /// Upper bound on the number of jobs; ocean tiles are skipped later.
    pub fn num_jobs(&self) -> usize {
        self.periods().len() * self.num_tiles()
    }

    /// Index of `period` along the time axis of the output array.
    pub fn time_index(&self, period: &Period) -> usize {
        let origin = Period::from_date(self.start_date);
        let months = period.months_since(&origin).max(0) as usize;
        months / self.time_frequency_months.max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> CubeConfig {
        CubeConfig::new(
            date(2020, 1, 15),
            date(2020, 12, 31),
            Extent::new(10.0, 45.0, 11.0, 46.0),
        )
    }

    #[test]
    fn test_defaults() {
        let config = sample();
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(config.bands(), ["red", "green", "blue"]);
        assert_eq!(config.varname(), "rgb_median");
        assert_eq!(config.epsg(), 4326);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dates_normalized_to_month_start() {
        let config = sample();
        assert_eq!(config.start_date(), date(2020, 1, 1));
        assert_eq!(config.end_date(), date(2020, 12, 1));
    }

    #[test]
    fn test_monthly_periods() {
        let periods = sample().periods();
        assert_eq!(periods.len(), 12);
        assert_eq!(periods[0], Period::new(2020, 1));
        assert_eq!(periods[11], Period::new(2020, 12));
    }

    #[test]
    fn test_quarterly_periods_and_time_index() {
        let config = sample().with_time_frequency_months(3);
        let periods = config.periods();
        assert_eq!(
            periods,
            vec![
                Period::new(2020, 1),
                Period::new(2020, 4),
                Period::new(2020, 7),
                Period::new(2020, 10),
            ]
        );
        for (i, period) in periods.iter().enumerate() {
            assert_eq!(config.time_index(period), i);
        }
    }

    #[test]
    fn test_num_jobs_is_tiles_times_periods() {
        let config = sample();
        // 3600 x 3600 pixels in 1200-pixel tiles
        assert_eq!(config.num_tiles(), 9);
        assert_eq!(config.num_jobs(), 9 * 12);
    }

    #[test]
    fn test_rejects_unsupported_crs() {
        let err = sample().with_epsg(3857).validate().unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedCrs(3857));
    }

    #[test]
    fn test_rejects_inverted_dates() {
        let config = CubeConfig::new(
            date(2021, 1, 1),
            date(2020, 1, 1),
            Extent::new(0.0, 0.0, 1.0, 1.0),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_same_month_is_valid() {
        let config = CubeConfig::new(
            date(2021, 3, 20),
            date(2021, 3, 2),
            Extent::new(0.0, 0.0, 1.0, 1.0),
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.periods().len(), 1);
    }

    #[test]
    fn test_rejects_bad_bounds() {
        let config = CubeConfig::new(
            date(2020, 1, 1),
            date(2020, 2, 1),
            Extent::new(1.0, 0.0, 0.0, 1.0),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBounds(..))
        ));

        let config = CubeConfig::new(
            date(2020, 1, 1),
            date(2020, 2, 1),
            Extent::new(0.0, 80.0, 1.0, 95.0),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBounds(..))
        ));
    }

    #[test]
    fn test_rejects_frequency_out_of_range() {
        assert_eq!(
            sample().with_time_frequency_months(0).validate(),
            Err(ConfigError::InvalidFrequency(0))
        );
        assert_eq!(
            sample().with_time_frequency_months(25).validate(),
            Err(ConfigError::InvalidFrequency(25))
        );
        assert!(sample().with_time_frequency_months(24).validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_bands_and_bad_varname() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(sample().with_bands(empty).validate(), Err(ConfigError::NoBands));
        assert!(matches!(
            sample().with_varname("a/b").validate(),
            Err(ConfigError::InvalidVarname(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip_preserves_config() {
        let config = sample().with_chunk_size(256);
        let json = serde_json::to_string(&config).unwrap();
        let back: CubeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
