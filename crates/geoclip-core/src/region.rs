//! Geographic bounding regions.
//!
//! Every extraction is scoped to an axis-aligned rectangle in EPSG:4326.
//! Regions supplied in other reference systems are transformed here, up
//! front, so that everything downstream works in one frame.

use crate::error::{ExtractError, Result};

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// An axis-aligned rectangle in geographic coordinates (EPSG:4326).
///
/// Longitudes are the x axis and latitudes the y axis. The constructor
/// normalizes the corners, so `min_x <= max_x` and `min_y <= max_y` always
/// hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingRegion {
    /// Western edge, degrees longitude.
    pub min_x: f64,
    /// Southern edge, degrees latitude.
    pub min_y: f64,
    /// Eastern edge, degrees longitude.
    pub max_x: f64,
    /// Northern edge, degrees latitude.
    pub max_y: f64,
}

impl BoundingRegion {
    /// Creates a region from two opposite corners, normalizing their order.
    #[must_use]
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        BoundingRegion {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Builds a region from corners expressed in the given CRS.
    ///
    /// Accepts `EPSG:4326` (identity) and `EPSG:3857` (spherical Web
    /// Mercator, inverted analytically). Anything else is rejected with
    /// [`ExtractError::UnsupportedCrs`].
    pub fn from_crs(x1: f64, y1: f64, x2: f64, y2: f64, crs: &str) -> Result<Self> {
        match crs.trim().to_ascii_uppercase().as_str() {
            "EPSG:4326" | "OGC:CRS84" => Ok(Self::new(x1, y1, x2, y2)),
            "EPSG:3857" => {
                let (lon1, lat1) = mercator_to_geographic(x1, y1);
                let (lon2, lat2) = mercator_to_geographic(x2, y2);
                Ok(Self::new(lon1, lat1, lon2, lat2))
            }
            other => Err(ExtractError::UnsupportedCrs {
                crs: other.to_string(),
            }),
        }
    }

    /// Returns the closed five-point ring tracing this region's boundary.
    ///
    /// Winding is counter-clockwise starting from the south-west corner,
    /// with the first point repeated at the end to close the ring.
    #[must_use]
    pub fn ring(&self) -> [(f64, f64); 5] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
            (self.min_x, self.min_y),
        ]
    }
}

fn mercator_to_geographic(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    (lon, lat)
}
