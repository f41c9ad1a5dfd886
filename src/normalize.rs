//! Canonicalization of raw source features into persisted district rows.
//!
//! The store's footprint is dominated by geometry bytes, so every feature
//! passes through Douglas-Peucker simplification before it is written. The
//! tolerance is recorded in the store header; it bounds the boundary error
//! online queries can observe.

use geo::{BoundingRect, Centroid, LineString, MultiPolygon, Polygon, Simplify, Validation};

use crate::geometry::Bbox;
use crate::logger;
use crate::reader::RawFeature;

/// Default simplification tolerance, in degrees of perpendicular deviation.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// A district row ready for the store writer.
#[derive(Debug, Clone)]
pub struct NormalizedDistrict {
    pub district_id: String,
    pub name: String,
    pub state_code: String,
    pub grade_lowest: String,
    pub grade_highest: String,
    pub land_area_m2: f64,
    pub water_area_m2: f64,
    pub school_year: String,
    pub bbox: Bbox,
    pub centroid_lng: f64,
    pub centroid_lat: f64,
    pub geometry: MultiPolygon<f64>,
}

/// Normalize one feature: validity check, exact envelope and centroid,
/// then simplification. Returns `None` (with a warning) for geometry the
/// store must not carry.
pub fn normalize(feature: RawFeature, tolerance: f64) -> Option<NormalizedDistrict> {
    let RawFeature {
        geoid,
        name,
        state_fips,
        lo_grade,
        hi_grade,
        land_area_m2,
        water_area_m2,
        school_year,
        geometry,
    } = feature;

    if !geometry.is_valid() {
        logger::warn(&format!(
            "rejecting district {}: invalid geometry (self-intersecting or malformed rings)",
            geoid
        ));
        return None;
    }

    // Envelope and centroid come from the full-resolution geometry; the
    // envelope of the simplified shape can only shrink within tolerance.
    let rect = match geometry.bounding_rect() {
        Some(rect) => rect,
        None => {
            logger::warn(&format!("rejecting district {}: empty geometry", geoid));
            return None;
        }
    };
    let bbox = Bbox::from_rect(&rect);

    let (centroid_lng, centroid_lat) = geometry
        .centroid()
        .map(|p| (p.x(), p.y()))
        .unwrap_or_else(|| {
            (
                (bbox.min_lng + bbox.max_lng) / 2.0,
                (bbox.min_lat + bbox.max_lat) / 2.0,
            )
        });

    let geometry = simplify_multipolygon(&geometry, tolerance);

    Some(NormalizedDistrict {
        district_id: geoid,
        name,
        state_code: state_fips,
        grade_lowest: lo_grade,
        grade_highest: hi_grade,
        land_area_m2: land_area_m2.max(0.0),
        water_area_m2: water_area_m2.max(0.0),
        school_year,
        bbox,
        centroid_lng,
        centroid_lat,
        geometry,
    })
}

/// Simplify each part independently; parts whose exterior is already
/// degenerate are dropped. If everything drops, the original geometry is
/// kept unchanged.
fn simplify_multipolygon(mp: &MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    let parts: Vec<Polygon<f64>> = mp
        .0
        .iter()
        .filter_map(|poly| simplify_part(poly, tolerance))
        .collect();

    if parts.is_empty() {
        mp.clone()
    } else {
        MultiPolygon::new(parts)
    }
}

fn simplify_part(poly: &Polygon<f64>, tolerance: f64) -> Option<Polygon<f64>> {
    // A closed ring needs at least 4 coordinates.
    if poly.exterior().0.len() < 4 {
        return None;
    }

    let exterior = simplify_ring(poly.exterior(), tolerance);
    let interiors: Vec<LineString<f64>> = poly
        .interiors()
        .iter()
        .map(|ring| simplify_ring(ring, tolerance))
        .collect();

    Some(Polygon::new(exterior, interiors))
}

/// Douglas-Peucker on a single ring, falling back to the original
/// coordinates when simplification collapses it.
fn simplify_ring(ring: &LineString<f64>, tolerance: f64) -> LineString<f64> {
    let simplified = ring.simplify(&tolerance);
    if simplified.0.len() < 4 {
        ring.clone()
    } else {
        simplified
    }
}
