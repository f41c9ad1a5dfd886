//! Query coordination: validation, bbox candidates, exact containment,
//! nearest-district fallback.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use geo::{Contains, Point};

use crate::decoder::GeometryDecoder;
use crate::error::{DistrictError, Result};
use crate::geometry::{distance_to_polygon_meters, haversine_meters};
use crate::logger;
use crate::store::{DistrictRow, DistrictStore};

/// Inclusive coordinate bounds covering US states and territories.
const LAT_RANGE: (f64, f64) = (18.0, 72.0);
const LNG_RANGE: (f64, f64) = (-180.0, -65.0);

/// Candidates consulted by the nearest-district fallback.
const NEAREST_K: usize = 5;

/// Engine configuration; passed explicitly, never ambient.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the built store file.
    pub store_path: PathBuf,
    /// Decoded-geometry cache entries; 0 disables the cache.
    pub lru_capacity: usize,
    /// Upper bound accepted by `lookup_batch`.
    pub batch_max: usize,
}

impl EngineConfig {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            lru_capacity: 32,
            batch_max: 100,
        }
    }
}

/// District attributes carried by a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictMatch {
    pub district_id: String,
    pub name: String,
    pub state_code: String,
    pub grade_range: String,
    pub area_sq_miles: f64,
    pub school_year: String,
}

impl DistrictMatch {
    fn from_row(row: &DistrictRow) -> Self {
        Self {
            district_id: row.district_id.clone(),
            name: row.name.clone(),
            state_code: row.state_code.clone(),
            grade_range: row.grade_range(),
            area_sq_miles: row.land_area_sq_miles(),
            school_year: row.school_year.clone(),
        }
    }
}

/// Outcome of one lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    /// The point lies inside the district's boundary.
    Exact(DistrictMatch),
    /// The point lies outside every boundary; this is the nearest district
    /// in centroid order, with the true boundary distance.
    Approximate {
        district: DistrictMatch,
        distance_meters: u32,
    },
    /// Empty (or fully undecodable) store.
    NotFound,
}

impl LookupResult {
    pub fn is_exact(&self) -> bool {
        matches!(self, LookupResult::Exact(_))
    }

    pub fn district(&self) -> Option<&DistrictMatch> {
        match self {
            LookupResult::Exact(district) => Some(district),
            LookupResult::Approximate { district, .. } => Some(district),
            LookupResult::NotFound => None,
        }
    }
}

/// Figures reported by [`LookupEngine::stats`].
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub total_districts: u64,
    pub school_year: String,
    pub tolerance: f64,
    pub lru_capacity: usize,
    pub lru_size: usize,
    pub memory_rss_bytes: u64,
}

/// Read-only lookup service over a built district store.
///
/// Construct once at startup and share; all methods take `&self`. Queries
/// may suspend only on the bbox-index probe and on geometry blob fetches,
/// so dropping a lookup future cancels it between those phases.
pub struct LookupEngine {
    store: Arc<DistrictStore>,
    decoder: GeometryDecoder,
    batch_max: usize,
    closed: AtomicBool,
}

impl LookupEngine {
    /// Open the store and prepare the decode cache.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(DistrictStore::open(&config.store_path).await?);
        let decoder = GeometryDecoder::new(Arc::clone(&store), config.lru_capacity);
        Ok(Self {
            store,
            decoder,
            batch_max: config.batch_max,
            closed: AtomicBool::new(false),
        })
    }

    /// Resolve a coordinate to its containing district, or to the nearest
    /// one when it falls outside every boundary.
    pub async fn lookup(&self, lat: f64, lng: f64) -> Result<LookupResult> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(DistrictError::Cancelled);
        }
        validate_coordinates(lat, lng)?;

        let point = Point::new(lng, lat);

        // Exact containment over the bbox candidates, in id order. A decode
        // failure skips that candidate only; the query carries on.
        for candidate in self.store.candidates_covering(lng, lat).await? {
            match self.decoder.decode(&candidate.district_id).await {
                Ok(geometry) => {
                    if geometry.contains(&point) {
                        return Ok(LookupResult::Exact(DistrictMatch::from_row(&candidate)));
                    }
                }
                Err(e) => logger::warn(&format!(
                    "skipping candidate {}: {}",
                    candidate.district_id, e
                )),
            }
        }

        // Outside every polygon: first usable candidate in centroid order.
        for candidate in self.store.nearest_by_centroid(lng, lat, NEAREST_K).await? {
            match self.decoder.decode(&candidate.district_id).await {
                Ok(geometry) => {
                    let meters = distance_to_polygon_meters(&geometry, point)
                        .unwrap_or_else(|| haversine_meters(point, candidate.centroid()));
                    return Ok(LookupResult::Approximate {
                        district: DistrictMatch::from_row(&candidate),
                        distance_meters: meters.round() as u32,
                    });
                }
                Err(e) => logger::warn(&format!(
                    "skipping candidate {}: {}",
                    candidate.district_id, e
                )),
            }
        }

        Ok(LookupResult::NotFound)
    }

    /// Resolve a batch of `(lat, lng)` points independently; result order
    /// matches input order. Batches over the configured bound are refused.
    pub async fn lookup_batch(
        &self,
        points: &[(f64, f64)],
    ) -> Result<Vec<Result<LookupResult>>> {
        if points.len() > self.batch_max {
            return Err(DistrictError::BatchTooLarge {
                len: points.len(),
                max: self.batch_max,
            });
        }

        let mut results = Vec::with_capacity(points.len());
        for &(lat, lng) in points {
            results.push(self.lookup(lat, lng).await);
        }
        Ok(results)
    }

    pub fn stats(&self) -> EngineStats {
        let store = self.store.stats();
        EngineStats {
            total_districts: store.total_districts,
            school_year: store.school_year,
            tolerance: store.tolerance,
            lru_capacity: self.decoder.cache_capacity(),
            lru_size: self.decoder.cache_len(),
            memory_rss_bytes: memory_rss_bytes(),
        }
    }

    /// Stop accepting queries, then close the store once in-flight queries
    /// have released their connections. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.store.close().await;
    }
}

fn validate_coordinates(lat: f64, lng: f64) -> Result<()> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(DistrictError::CoordinateNotFinite);
    }
    if lat < LAT_RANGE.0 || lat > LAT_RANGE.1 || lng < LNG_RANGE.0 || lng > LNG_RANGE.1 {
        return Err(DistrictError::CoordinateOutOfRange { lat, lng });
    }
    Ok(())
}

/// Resident set size of this process. Linux only; other platforms report 0.
#[cfg(target_os = "linux")]
fn memory_rss_bytes() -> u64 {
    // statm reports pages; 4 KiB pages on every deployment target.
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|statm| statm.split_whitespace().nth(1)?.parse::<u64>().ok())
        .map(|pages| pages * 4096)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn memory_rss_bytes() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_us_coordinates() {
        assert!(validate_coordinates(42.3601, -71.0589).is_ok()); // Boston
        assert!(validate_coordinates(64.8378, -147.7164).is_ok()); // Fairbanks
        assert!(validate_coordinates(18.4655, -66.1057).is_ok()); // San Juan
    }

    #[test]
    fn test_validate_accepts_range_edges() {
        assert!(validate_coordinates(18.0, -180.0).is_ok());
        assert!(validate_coordinates(72.0, -65.0).is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        // Gulf of Guinea
        assert!(matches!(
            validate_coordinates(0.0, 0.0),
            Err(DistrictError::CoordinateOutOfRange { .. })
        ));
        // London: latitude fits, longitude does not
        assert!(matches!(
            validate_coordinates(51.5074, -0.1278),
            Err(DistrictError::CoordinateOutOfRange { .. })
        ));
        assert!(matches!(
            validate_coordinates(80.0, -100.0),
            Err(DistrictError::CoordinateOutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        assert!(matches!(
            validate_coordinates(42.3601, f64::NAN),
            Err(DistrictError::CoordinateNotFinite)
        ));
        assert!(matches!(
            validate_coordinates(f64::INFINITY, -71.0),
            Err(DistrictError::CoordinateNotFinite)
        ));
        // Non-finite wins over range checks.
        assert!(matches!(
            validate_coordinates(f64::NEG_INFINITY, 0.0),
            Err(DistrictError::CoordinateNotFinite)
        ));
    }

    #[test]
    fn test_lookup_result_accessors() {
        let district = DistrictMatch {
            district_id: "2502790".to_string(),
            name: "Boston".to_string(),
            state_code: "25".to_string(),
            grade_range: "Pre-K - 12".to_string(),
            area_sq_miles: 48.0,
            school_year: "2023-2024".to_string(),
        };

        let exact = LookupResult::Exact(district.clone());
        assert!(exact.is_exact());
        assert_eq!(exact.district().unwrap().district_id, "2502790");

        let approx = LookupResult::Approximate {
            district,
            distance_meters: 120,
        };
        assert!(!approx.is_exact());
        assert!(approx.district().is_some());

        assert!(LookupResult::NotFound.district().is_none());
    }
}
