//! Geometric primitives shared by the build and query paths.

use geo::{Closest, ClosestPoint, Geometry, MultiPolygon, Point, Rect};

use crate::error::{DistrictError, Result};

/// Mean earth radius in meters, for haversine distances.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Axis-aligned bounding box in WGS84 coordinates (longitude, latitude).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    /// Minimum longitude (degrees).
    pub min_lng: f64,
    /// Minimum latitude (degrees).
    pub min_lat: f64,
    /// Maximum longitude (degrees).
    pub max_lng: f64,
    /// Maximum latitude (degrees).
    pub max_lat: f64,
}

impl Bbox {
    /// Creates a new bounding box.
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        }
    }

    /// Builds a bbox from a geo rectangle.
    pub fn from_rect(rect: &Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Whether the box covers the given point. Edges count as covered.
    pub fn covers(&self, lng: f64, lat: f64) -> bool {
        self.min_lng <= lng && lng <= self.max_lng && self.min_lat <= lat && lat <= self.max_lat
    }
}

/// Encode a multipolygon as ISO WKB bytes for the store.
pub fn encode_multipolygon(mp: MultiPolygon<f64>) -> Result<Vec<u8>> {
    wkb::geom_to_wkb(&Geometry::MultiPolygon(mp))
        .map_err(|e| DistrictError::Internal(format!("WKB encoding failed: {:?}", e)))
}

/// Decode a stored WKB blob back into a multipolygon.
///
/// Returns `None` for undecodable bytes or non-polygonal geometry; the
/// caller decides whether that is fatal.
pub fn decode_multipolygon(bytes: &[u8]) -> Option<MultiPolygon<f64>> {
    match wkb::wkb_to_geom(&mut std::io::Cursor::new(bytes)).ok()? {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Some(mp),
        _ => None,
    }
}

/// Great-circle distance between two WGS84 points, in meters.
pub fn haversine_meters(a: Point<f64>, b: Point<f64>) -> f64 {
    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();
    let dlat = (b.y() - a.y()).to_radians();
    let dlng = (b.x() - a.x()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// True distance in meters from a point to the nearest boundary point of a
/// multipolygon. Zero when the point touches or lies inside the geometry.
///
/// Returns `None` when the geometry has no determinate closest point
/// (degenerate or empty shapes).
pub fn distance_to_polygon_meters(mp: &MultiPolygon<f64>, point: Point<f64>) -> Option<f64> {
    match mp.closest_point(&point) {
        Closest::Intersection(_) => Some(0.0),
        Closest::SinglePoint(boundary) => Some(haversine_meters(point, boundary)),
        Closest::Indeterminate => None,
    }
}
