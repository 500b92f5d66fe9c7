//! Pixel grid and tile grid over geographic coordinates (EPSG:4326).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tolerance, in pixels, when snapping bounds to the resolution grid.
const SNAP_EPSILON: f64 = 1e-6;

// =============================================================================
// Extent
// =============================================================================

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Extent {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Centre longitude, used for solar-day grouping.
    pub fn center_lon(&self) -> f64 {
        (self.min_lon + self.max_lon) / 2.0
    }

    /// True when the two boxes share any area or boundary.
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// True when the point lies inside or on the border.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// Corners in counter-clockwise order starting at the south-west.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_lon, self.min_lat),
            (self.max_lon, self.min_lat),
            (self.max_lon, self.max_lat),
            (self.min_lon, self.max_lat),
        ]
    }

    /// GeoJSON polygon geometry for catalog `intersects` queries.
    pub fn to_geojson(&self) -> serde_json::Value {
        let mut ring: Vec<[f64; 2]> = self.corners().iter().map(|&(x, y)| [x, y]).collect();
        ring.push([self.min_lon, self.min_lat]);
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [ring],
        })
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

// =============================================================================
// GeoBox
// =============================================================================

/// A north-up pixel grid.
///
/// Row 0 is the northernmost row and column 0 the westernmost column.
/// Pixel `(row, col)` covers
/// `[west + col·res, west + (col+1)·res] × [north − (row+1)·res, north − row·res]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub west: f64,
    pub north: f64,
    pub resolution: f64,
    pub width: usize,
    pub height: usize,
}

impl GeoBox {
    /// Snaps `extent` outward onto the resolution grid anchored at (0, 0).
    pub fn from_extent(extent: &Extent, resolution: f64) -> Self {
        let west = (extent.min_lon / resolution + SNAP_EPSILON).floor();
        let east = (extent.max_lon / resolution - SNAP_EPSILON).ceil();
        let south = (extent.min_lat / resolution + SNAP_EPSILON).floor();
        let north = (extent.max_lat / resolution - SNAP_EPSILON).ceil();

        Self {
            west: west * resolution,
            north: north * resolution,
            resolution,
            width: (east - west).max(0.0) as usize,
            height: (north - south).max(0.0) as usize,
        }
    }

    /// `(height, width)` in pixels.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn extent(&self) -> Extent {
        Extent::new(
            self.west,
            self.north - self.height as f64 * self.resolution,
            self.west + self.width as f64 * self.resolution,
            self.north,
        )
    }

    /// Longitude of the centre of column `col`.
    pub fn lon(&self, col: usize) -> f64 {
        self.west + (col as f64 + 0.5) * self.resolution
    }

    /// Latitude of the centre of row `row`.
    pub fn lat(&self, row: usize) -> f64 {
        self.north - (row as f64 + 0.5) * self.resolution
    }

    /// Pixel-centre longitudes, west to east.
    pub fn longitudes(&self) -> Vec<f64> {
        (0..self.width).map(|c| self.lon(c)).collect()
    }

    /// Pixel-centre latitudes, north to south.
    pub fn latitudes(&self) -> Vec<f64> {
        (0..self.height).map(|r| self.lat(r)).collect()
    }

    /// Sub-grid starting at `(row, col)` of the given size, clipped to this box.
    pub fn window(&self, row: usize, col: usize, height: usize, width: usize) -> GeoBox {
        let height = height.min(self.height.saturating_sub(row));
        let width = width.min(self.width.saturating_sub(col));
        GeoBox {
            west: self.west + col as f64 * self.resolution,
            north: self.north - row as f64 * self.resolution,
            resolution: self.resolution,
            width,
            height,
        }
    }
}

// =============================================================================
// Tiles
// =============================================================================

/// Position of a tile in the tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    pub row: usize,
    pub col: usize,
}

impl TileIndex {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// The geobox split into square tiles aligned with the array chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    geobox: GeoBox,
    chunk_size: usize,
}

impl TileGrid {
    pub fn new(geobox: GeoBox, chunk_size: usize) -> Self {
        Self {
            geobox,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn geobox(&self) -> &GeoBox {
        &self.geobox
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// `(tile_rows, tile_cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (
            self.geobox.height.div_ceil(self.chunk_size),
            self.geobox.width.div_ceil(self.chunk_size),
        )
    }

    pub fn len(&self) -> usize {
        let (rows, cols) = self.shape();
        rows * cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        let (rows, cols) = self.shape();
        index.row < rows && index.col < cols
    }

    /// All tile indices, row-major.
    pub fn indices(&self) -> impl Iterator<Item = TileIndex> {
        let (rows, cols) = self.shape();
        (0..rows).flat_map(move |row| (0..cols).map(move |col| TileIndex::new(row, col)))
    }

    /// Pixel offset `(row, col)` of the tile's north-west corner.
    pub fn offset(&self, index: TileIndex) -> (usize, usize) {
        (index.row * self.chunk_size, index.col * self.chunk_size)
    }

    /// Pixel grid covered by one tile; edge tiles are truncated.
    pub fn tile_geobox(&self, index: TileIndex) -> GeoBox {
        let (row, col) = self.offset(index);
        self.geobox
            .window(row, col, self.chunk_size, self.chunk_size)
    }

    pub fn tile_extent(&self, index: TileIndex) -> Extent {
        self.tile_geobox(index).extent()
    }
}
