//! Land/ocean filtering for tiles.
//!
//! Tiles that contain no land are never turned into jobs. The production
//! mask is a set of land polygons read from GeoJSON (for example the
//! Natural Earth `ne_110m_land` layer); [`AllLand`] keeps every tile.

use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::grid::Extent;

/// Errors from loading a land mask.
#[derive(Debug, Error)]
pub enum LandMaskError {
    #[error("failed to read land mask {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid land mask JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid land mask geometry: {0}")]
    Geometry(String),
}

/// Decides whether a tile footprint touches land.
pub trait LandMask: Send + Sync {
    fn intersects(&self, extent: &Extent) -> bool;
}

/// Treats the whole grid as land.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllLand;

impl LandMask for AllLand {
    fn intersects(&self, _extent: &Extent) -> bool {
        true
    }
}

/// One polygon's outer ring with a cached bounding box.
///
/// Holes are ignored: a tile inside a lake still counts as land.
#[derive(Debug, Clone)]
struct Ring {
    points: Vec<(f64, f64)>,
    bounds: Extent,
}

impl Ring {
    fn new(points: Vec<(f64, f64)>) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let mut bounds = Extent::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for &(x, y) in &points {
            bounds.min_lon = bounds.min_lon.min(x);
            bounds.min_lat = bounds.min_lat.min(y);
            bounds.max_lon = bounds.max_lon.max(x);
            bounds.max_lat = bounds.max_lat.max(y);
        }
        Some(Self { points, bounds })
    }

    /// Even-odd ray casting.
    fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        let n = self.points.len();
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.points[i];
            let (xj, yj) = self.points[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    fn edges(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    fn intersects(&self, extent: &Extent) -> bool {
        if !self.bounds.intersects(extent) {
            return false;
        }
        if self.points.iter().any(|&(x, y)| extent.contains(x, y)) {
            return true;
        }
        if extent.corners().iter().any(|&(x, y)| self.contains(x, y)) {
            return true;
        }
        let corners = extent.corners();
        let sides = [
            (corners[0], corners[1]),
            (corners[1], corners[2]),
            (corners[2], corners[3]),
            (corners[3], corners[0]),
        ];
        self.edges()
            .any(|(a, b)| sides.iter().any(|&(c, d)| segments_cross(a, b, c, d)))
    }
}

fn orientation(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn segments_cross(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// Land polygons loaded from a GeoJSON document.
#[derive(Debug, Clone, Default)]
pub struct GeoJsonLandMask {
    rings: Vec<Ring>,
}

impl GeoJsonLandMask {
    /// Loads a FeatureCollection, Feature or bare geometry from disk.
    pub fn from_file(path: &Path) -> Result<Self, LandMaskError> {
        let text = fs::read_to_string(path).map_err(|source| LandMaskError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_geojson_str(&text)
    }

    pub fn from_geojson_str(text: &str) -> Result<Self, LandMaskError> {
        let value: Value = serde_json::from_str(text)?;
        let mut rings = Vec::new();
        collect_rings(&value, &mut rings)?;
        tracing::debug!(polygons = rings.len(), "Loaded land mask");
        Ok(Self { rings })
    }

    pub fn polygon_count(&self) -> usize {
        self.rings.len()
    }
}

impl LandMask for GeoJsonLandMask {
    fn intersects(&self, extent: &Extent) -> bool {
        self.rings.iter().any(|ring| ring.intersects(extent))
    }
}

fn collect_rings(value: &Value, rings: &mut Vec<Ring>) -> Result<(), LandMaskError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| LandMaskError::Geometry("object without 'type'".to_string()))?;

    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| LandMaskError::Geometry("missing 'features'".to_string()))?;
            for feature in features {
                collect_rings(feature, rings)?;
            }
        }
        "Feature" => {
            if let Some(geometry) = value.get("geometry").filter(|g| !g.is_null()) {
                collect_rings(geometry, rings)?;
            }
        }
        "GeometryCollection" => {
            if let Some(geometries) = value.get("geometries").and_then(Value::as_array) {
                for geometry in geometries {
                    collect_rings(geometry, rings)?;
                }
            }
        }
        "Polygon" => {
            let coordinates = value.get("coordinates").ok_or_else(|| {
                LandMaskError::Geometry("Polygon without coordinates".to_string())
            })?;
            push_polygon(coordinates, rings)?;
        }
        "MultiPolygon" => {
            let polygons = value
                .get("coordinates")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    LandMaskError::Geometry("MultiPolygon without coordinates".to_string())
                })?;
            for polygon in polygons {
                push_polygon(polygon, rings)?;
            }
        }
        // Points and lines carry no area.
        _ => {}
    }
    Ok(())
}

fn push_polygon(polygon: &Value, rings: &mut Vec<Ring>) -> Result<(), LandMaskError> {
    let outer = polygon
        .as_array()
        .and_then(|rings| rings.first())
        .and_then(Value::as_array)
        .ok_or_else(|| LandMaskError::Geometry("polygon without outer ring".to_string()))?;

    let points = outer
        .iter()
        .map(|p| {
            let x = p.get(0).and_then(Value::as_f64);
            let y = p.get(1).and_then(Value::as_f64);
            x.zip(y)
                .ok_or_else(|| LandMaskError::Geometry(format!("bad position {}", p)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(ring) = Ring::new(points) {
        rings.push(ring);
    }
    Ok(())
}
