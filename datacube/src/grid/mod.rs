//! Spatial and temporal layout of the data cube.
//!
//! A [`CubeConfig`] fixes everything needed to derive the output grid:
//! the geographic bounds snap to a [`GeoBox`] at the configured resolution,
//! the geobox splits into a [`TileGrid`] of `chunk_size × chunk_size` tiles,
//! and the date range expands into a list of [`Period`]s.
//!
//! ```text
//!   bbox + resolution ──► GeoBox (rows × cols pixels)
//!                            │
//!                            ▼
//!                       TileGrid (tile_rows × tile_cols)
//!                            │      ┌──────────────┐
//!   start/end + freq ──► periods ──►│ jobs = tiles │
//!                                   │     × periods│
//!                                   └──────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use chrono::NaiveDate;
//! use datacube::grid::{CubeConfig, Extent};
//!
//! let config = CubeConfig::new(
//!     NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
//!     Extent::new(-122.5, 37.0, -121.5, 38.0),
//! )
//! .with_chunk_size(600);
//!
//! config.validate()?;
//! println!("{} tiles, {} periods", config.num_tiles(), config.periods().len());
//! ```

mod config;
mod geobox;
mod period;

pub use config::{
    ConfigError, CubeConfig, DEFAULT_BANDS, DEFAULT_CHUNK_SIZE, DEFAULT_RESOLUTION,
    DEFAULT_TIME_FREQUENCY_MONTHS, DEFAULT_VARNAME, MAX_TIME_FREQUENCY_MONTHS, SUPPORTED_EPSG,
};
pub use geobox::{Extent, GeoBox, TileGrid, TileIndex};
pub use period::{days_since_epoch, Period};
