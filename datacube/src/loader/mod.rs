//! Loading scene bands onto a tile's pixel grid.
//!
//! For every scene the classification band ([`SCL_BAND`]) and the requested
//! reflectance bands are resampled onto the tile [`GeoBox`]. Scenes from the
//! same solar day (adjacent granules of one overpass) are then merged into a
//! single time step, first valid pixel wins.
//!
//! # Example
//!
//! ```ignore
//! use datacube::http::AsyncReqwestClient;
//! use datacube::loader::{GeoTiffLoader, SceneLoader};
//!
//! let loader = GeoTiffLoader::new(AsyncReqwestClient::new()?).with_io_concurrency(16);
//! let steps = loader.load(&scenes, &bands, &job.geobox()).await?;
//! ```

mod geotiff;
mod projection;

pub use geotiff::{
    GeoTiffLoader, Resampling, DEFAULT_BLOCK_BYTES, DEFAULT_IO_CONCURRENCY, DEFAULT_MAX_WINDOW_BYTES,
};
pub use projection::{utm_forward, SourceCrs};

use std::future::Future;

use thiserror::Error;

use crate::catalog::Scene;
use crate::grid::GeoBox;
use crate::http::HttpError;

/// Asset name of the Sentinel-2 scene classification layer.
pub const SCL_BAND: &str = "scl";

/// Errors from loading band data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("scene {scene} has no '{asset}' asset")]
    MissingAsset { scene: String, asset: String },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("failed to decode {url}: {message}")]
    Decode { url: String, message: String },

    #[error("unsupported coordinate system in {url}: {crs}")]
    UnsupportedCrs { url: String, crs: String },

    #[error("window of {url} needs {bytes} bytes, above the limit of {limit}")]
    WindowTooLarge { url: String, bytes: usize, limit: usize },

    #[error("load task failed: {0}")]
    Task(String),
}

/// One band on a tile grid, row-major, 0 = no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u16>,
}

impl Raster {
    pub fn new(width: usize, height: usize, data: Vec<u16>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn filled(width: usize, height: usize, value: u16) -> Self {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn get(&self, row: usize, col: usize) -> u16 {
        self.data[row * self.width + col]
    }
}

/// Classification plus reflectance bands for one time step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneLayers {
    pub scl: Raster,
    /// In the order the bands were requested.
    pub bands: Vec<Raster>,
}

/// Loads band data for a set of scenes onto one tile.
pub trait SceneLoader: Send + Sync {
    /// Returns one [`SceneLayers`] per solar day, ordered by date.
    fn load(
        &self,
        scenes: &[Scene],
        bands: &[String],
        geobox: &GeoBox,
    ) -> impl Future<Output = Result<Vec<SceneLayers>, LoadError>> + Send;
}

/// Merges per-scene layers into one entry per solar day.
///
/// `layers[i]` belongs to `scenes[i]`. Within a day, scenes are visited in
/// acquisition order and each pixel keeps the first scene whose
/// classification is non-zero.
pub fn mosaic_by_solar_day(
    scenes: &[Scene],
    layers: Vec<SceneLayers>,
    lon: f64,
) -> Vec<SceneLayers> {
    let mut keyed: Vec<_> = scenes
        .iter()
        .map(|s| (s.solar_day(lon), s.datetime))
        .zip(layers)
        .collect();
    keyed.sort_by_key(|((day, datetime), _)| (*day, *datetime));

    let mut days: Vec<(chrono::NaiveDate, SceneLayers)> = Vec::new();
    for ((day, _), layers) in keyed {
        match days.last_mut() {
            Some((current, merged)) if *current == day => fill_missing(merged, &layers),
            _ => days.push((day, layers)),
        }
    }
    days.into_iter().map(|(_, layers)| layers).collect()
}

fn fill_missing(target: &mut SceneLayers, source: &SceneLayers) {
    for i in 0..target.scl.data.len() {
        if target.scl.data[i] == 0 && source.scl.data[i] != 0 {
            target.scl.data[i] = source.scl.data[i];
            for (band, other) in target.bands.iter_mut().zip(&source.bands) {
                band.data[i] = other.data[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scene(id: &str, datetime: &str) -> Scene {
        Scene {
            id: id.to_string(),
            datetime: datetime.parse().unwrap(),
            assets: BTreeMap::new(),
            cloud_cover: None,
        }
    }

    fn layers(scl: [u16; 2], red: [u16; 2]) -> SceneLayers {
        SceneLayers {
            scl: Raster::new(2, 1, scl.to_vec()),
            bands: vec![Raster::new(2, 1, red.to_vec())],
        }
    }

    #[test]
    fn test_same_day_scenes_are_merged() {
        let scenes = [
            scene("a", "2020-01-05T10:30:00Z"),
            scene("b", "2020-01-05T10:30:05Z"),
        ];
        let merged = mosaic_by_solar_day(
            &scenes,
            vec![layers([4, 0], [100, 0]), layers([5, 5], [200, 300])],
            0.0,
        );

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].scl.data, vec![4, 5]);
        assert_eq!(merged[0].bands[0].data, vec![100, 300]);
    }

    #[test]
    fn test_different_days_stay_separate_and_sorted() {
        let scenes = [
            scene("late", "2020-01-10T10:30:00Z"),
            scene("early", "2020-01-05T10:30:00Z"),
        ];
        let merged = mosaic_by_solar_day(
            &scenes,
            vec![layers([4, 4], [2, 2]), layers([4, 4], [1, 1])],
            0.0,
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].bands[0].data, vec![1, 1]);
        assert_eq!(merged[1].bands[0].data, vec![2, 2]);
    }

    #[test]
    fn test_raster_accessors() {
        let raster = Raster::new(3, 2, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(raster.get(1, 0), 4);
        assert_eq!(Raster::filled(2, 2, 7).data, vec![7; 4]);
    }
}
