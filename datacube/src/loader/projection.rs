//! Source coordinate systems and the WGS84 UTM forward projection.

use std::fmt;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Coordinate system a source raster is georeferenced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCrs {
    /// EPSG:4326, coordinates are longitude/latitude in degrees.
    Geographic,
    /// WGS84 / UTM zone `zone` (EPSG:326zz north, 327zz south).
    Utm { zone: u8, south: bool },
}

impl SourceCrs {
    /// Maps an EPSG code to a supported coordinate system.
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 => Some(Self::Geographic),
            32601..=32660 => Some(Self::Utm {
                zone: (code - 32600) as u8,
                south: false,
            }),
            32701..=32760 => Some(Self::Utm {
                zone: (code - 32700) as u8,
                south: true,
            }),
            _ => None,
        }
    }

    /// Projects a longitude/latitude pair into this system.
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            Self::Geographic => (lon, lat),
            Self::Utm { zone, south } => utm_forward(lon, lat, zone, south),
        }
    }
}

impl fmt::Display for SourceCrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Geographic => write!(f, "EPSG:4326"),
            Self::Utm { zone, south: false } => write!(f, "EPSG:{}", 32600 + *zone as u32),
            Self::Utm { zone, south: true } => write!(f, "EPSG:{}", 32700 + *zone as u32),
        }
    }
}

/// Transverse Mercator forward projection on the WGS84 ellipsoid.
///
/// Returns `(easting, northing)` in metres for the given UTM zone.
pub fn utm_forward(lon: f64, lat: f64, zone: u8, south: bool) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let lon0 = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
    let phi = lat.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lon - lon0).to_radians();

    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let easting = UTM_K0
        * n
        * (a + (1.0 - t + c) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0)
        + UTM_FALSE_EASTING;

    let mut northing = UTM_K0
        * (m + n
            * tan_phi
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));
    if south {
        northing += UTM_FALSE_NORTHING_SOUTH;
    }

    (easting, northing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_epsg() {
        assert_eq!(SourceCrs::from_epsg(4326), Some(SourceCrs::Geographic));
        assert_eq!(
            SourceCrs::from_epsg(32633),
            Some(SourceCrs::Utm {
                zone: 33,
                south: false
            })
        );
        assert_eq!(
            SourceCrs::from_epsg(32756),
            Some(SourceCrs::Utm {
                zone: 56,
                south: true
            })
        );
        assert_eq!(SourceCrs::from_epsg(3857), None);
    }

    #[test]
    fn test_central_meridian_at_equator() {
        let (x, y) = utm_forward(3.0, 0.0, 31, false);
        assert!((x - 500_000.0).abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_central_meridian_at_45_degrees() {
        // k0 times the WGS84 meridian arc length to 45 degrees.
        let (x, y) = utm_forward(3.0, 45.0, 31, false);
        assert!((x - 500_000.0).abs() < 1e-6);
        assert!((y - 4_982_950.4).abs() < 1.0, "northing {y}");
    }

    #[test]
    fn test_easting_symmetric_about_central_meridian() {
        let (east, n1) = utm_forward(4.0, 50.0, 31, false);
        let (west, n2) = utm_forward(2.0, 50.0, 31, false);
        assert!(((east - 500_000.0) + (west - 500_000.0)).abs() < 1e-6);
        assert!((n1 - n2).abs() < 1e-6);
        assert!(east > 500_000.0);
    }

    #[test]
    fn test_southern_hemisphere_false_northing() {
        let (_, y) = utm_forward(3.0, -10.0, 31, true);
        assert!(y < 10_000_000.0 && y > 8_000_000.0);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SourceCrs::Utm {
                zone: 10,
                south: false
            }
            .to_string(),
            "EPSG:32610"
        );
    }
}
