use std::path::Path;

use geo::Point;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{DistrictError, Result};
use crate::geometry::Bbox;

/// Newest store layout this build can read.
pub const STORE_VERSION: u32 = 1;

/// Geometry blob format recorded in the store header.
pub const GEOMETRY_ENCODING: &str = "wkb";

/// Square meters per square mile.
const SQ_METERS_PER_SQ_MILE: f64 = 2_589_988.11;

const ROW_COLUMNS: &str = "district_id, name, state_code, grade_lowest, grade_highest, \
     land_area_m2, water_area_m2, school_year, \
     min_lng, min_lat, max_lng, max_lat, centroid_lng, centroid_lat";

/// Metadata header written by the builder.
#[derive(Debug, Clone)]
pub struct StoreMeta {
    pub builder_version: u32,
    pub source_file: String,
    pub school_year: String,
    pub tolerance: f64,
    pub district_count: u64,
    pub geometry_encoding: String,
    pub row_crc: u32,
}

/// One district row, geometry excluded (blobs are fetched separately by id).
#[derive(Debug, Clone)]
pub struct DistrictRow {
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
}

impl DistrictRow {
    /// Presentation grade span, e.g. `"Pre-K - 12"`.
    pub fn grade_range(&self) -> String {
        format!(
            "{} - {}",
            normalize_grade(&self.grade_lowest),
            normalize_grade(&self.grade_highest)
        )
    }

    pub fn land_area_sq_miles(&self) -> f64 {
        square_meters_to_miles(self.land_area_m2)
    }

    pub fn water_area_sq_miles(&self) -> f64 {
        square_meters_to_miles(self.water_area_m2)
    }

    pub fn centroid(&self) -> Point<f64> {
        Point::new(self.centroid_lng, self.centroid_lat)
    }
}

/// Store-wide figures reported by `stats`.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_districts: u64,
    pub school_year: String,
    pub tolerance: f64,
}

/// Read-only handle over the persistent district store.
pub struct DistrictStore {
    pool: SqlitePool,
    meta: StoreMeta,
}

impl DistrictStore {
    /// Open a built store in shared-read mode.
    ///
    /// Refuses stores written by a newer builder, stores with a damaged or
    /// absent metadata header, and stores whose row CRC or district count
    /// no longer matches the header.
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DistrictError::StoreMissing(path.display().to_string()));
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        let pool = SqlitePool::connect_with(connect).await.map_err(|e| {
            DistrictError::StoreCorrupt(format!("{}: {}", path.display(), e))
        })?;

        let meta = match read_meta(&pool).await {
            Ok(meta) => meta,
            Err(e) => {
                pool.close().await;
                return Err(e);
            }
        };

        if meta.builder_version > STORE_VERSION {
            pool.close().await;
            return Err(DistrictError::VersionMismatch {
                found: meta.builder_version,
                supported: STORE_VERSION,
            });
        }

        if let Err(e) = verify_integrity(&pool, &meta).await {
            pool.close().await;
            return Err(e);
        }

        Ok(Self { pool, meta })
    }

    /// Bbox-index probe: all districts whose envelope covers the point,
    /// ordered by district id.
    pub async fn candidates_covering(&self, lng: f64, lat: f64) -> Result<Vec<DistrictRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM districts
             WHERE min_lng <= ?1 AND max_lng >= ?1 AND min_lat <= ?2 AND max_lat >= ?2
             ORDER BY district_id"
        );
        let rows = sqlx::query(&sql)
            .bind(lng)
            .bind(lat)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(district_from_row).collect())
    }

    /// The `k` districts whose centroids are closest to the point, by planar
    /// squared distance, district id as tiebreak.
    pub async fn nearest_by_centroid(&self, lng: f64, lat: f64, k: usize) -> Result<Vec<DistrictRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS},
                    (centroid_lng - ?1) * (centroid_lng - ?1)
                  + (centroid_lat - ?2) * (centroid_lat - ?2) AS d2
             FROM districts
             ORDER BY d2, district_id
             LIMIT ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(lng)
            .bind(lat)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(district_from_row).collect())
    }

    /// Raw geometry blob for one district, `None` when the id is unknown.
    pub async fn geometry_blob(&self, district_id: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT geometry FROM districts WHERE district_id = ?1")
            .bind(district_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("geometry")))
    }

    /// District counts per state code, off the state-code index.
    pub async fn state_counts(&self) -> Result<Vec<(String, u64)>> {
        let rows = sqlx::query(
            "SELECT state_code, COUNT(*) AS n FROM districts
             GROUP BY state_code ORDER BY state_code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("state_code"), row.get::<i64, _>("n") as u64))
            .collect())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_districts: self.meta.district_count,
            school_year: self.meta.school_year.clone(),
            tolerance: self.meta.tolerance,
        }
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Close the underlying pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn read_meta(pool: &SqlitePool) -> Result<StoreMeta> {
    let row = sqlx::query(
        "SELECT builder_version, source_file, school_year, tolerance,
                district_count, geometry_encoding, row_crc
         FROM store_meta WHERE id = 1",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| DistrictError::StoreCorrupt(format!("metadata header unreadable: {}", e)))?;

    Ok(StoreMeta {
        builder_version: row.get::<i64, _>("builder_version") as u32,
        source_file: row.get("source_file"),
        school_year: row.get("school_year"),
        tolerance: row.get("tolerance"),
        district_count: row.get::<i64, _>("district_count") as u64,
        geometry_encoding: row.get("geometry_encoding"),
        row_crc: row.get::<i64, _>("row_crc") as u32,
    })
}

async fn verify_integrity(pool: &SqlitePool, meta: &StoreMeta) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM districts")
        .fetch_one(pool)
        .await
        .map_err(|e| DistrictError::StoreCorrupt(format!("district table unreadable: {}", e)))?;
    if count as u64 != meta.district_count {
        return Err(DistrictError::StoreCorrupt(format!(
            "header declares {} districts, table holds {}",
            meta.district_count, count
        )));
    }

    let rows = sqlx::query(
        "SELECT district_id, min_lng, min_lat, max_lng, max_lat
         FROM districts ORDER BY district_id",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| DistrictError::StoreCorrupt(format!("district table unreadable: {}", e)))?;

    let mut hasher = crc32fast::Hasher::new();
    for row in &rows {
        let district_id: String = row.get("district_id");
        let bbox = Bbox::new(
            row.get("min_lng"),
            row.get("min_lat"),
            row.get("max_lng"),
            row.get("max_lat"),
        );
        fold_row_crc(&mut hasher, &district_id, &bbox);
    }
    let crc = hasher.finalize();

    if crc != meta.row_crc {
        return Err(DistrictError::StoreCorrupt(format!(
            "row CRC mismatch: header {:08x}, computed {:08x}",
            meta.row_crc, crc
        )));
    }
    Ok(())
}

/// Fold one row into the store integrity CRC. Builder and reader must agree
/// on this exact byte layout.
pub(crate) fn fold_row_crc(hasher: &mut crc32fast::Hasher, district_id: &str, bbox: &Bbox) {
    hasher.update(district_id.as_bytes());
    hasher.update(&bbox.min_lng.to_le_bytes());
    hasher.update(&bbox.min_lat.to_le_bytes());
    hasher.update(&bbox.max_lng.to_le_bytes());
    hasher.update(&bbox.max_lat.to_le_bytes());
}

fn district_from_row(row: &SqliteRow) -> DistrictRow {
    DistrictRow {
        district_id: row.get("district_id"),
        name: row.get("name"),
        state_code: row.get("state_code"),
        grade_lowest: row.get("grade_lowest"),
        grade_highest: row.get("grade_highest"),
        land_area_m2: row.get("land_area_m2"),
        water_area_m2: row.get("water_area_m2"),
        school_year: row.get("school_year"),
        bbox: Bbox::new(
            row.get("min_lng"),
            row.get("min_lat"),
            row.get("max_lng"),
            row.get("max_lat"),
        ),
        centroid_lng: row.get("centroid_lng"),
        centroid_lat: row.get("centroid_lat"),
    }
}

/// Map an NCES grade code for presentation. Numeric codes lose their
/// leading zeros; unknown codes pass through unchanged.
pub fn normalize_grade(code: &str) -> String {
    match code {
        "PK" => "Pre-K".to_string(),
        "KG" => "K".to_string(),
        "UG" => "Ungraded".to_string(),
        _ => {
            if !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()) {
                let stripped = code.trim_start_matches('0');
                if stripped.is_empty() { "0" } else { stripped }.to_string()
            } else {
                code.to_string()
            }
        }
    }
}

fn square_meters_to_miles(area_m2: f64) -> f64 {
    area_m2 / SQ_METERS_PER_SQ_MILE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_grade_special_codes() {
        assert_eq!(normalize_grade("PK"), "Pre-K");
        assert_eq!(normalize_grade("KG"), "K");
        assert_eq!(normalize_grade("UG"), "Ungraded");
    }

    #[test]
    fn test_normalize_grade_numeric() {
        assert_eq!(normalize_grade("01"), "1");
        assert_eq!(normalize_grade("09"), "9");
        assert_eq!(normalize_grade("12"), "12");
        assert_eq!(normalize_grade("00"), "0");
    }

    #[test]
    fn test_normalize_grade_unknown_passes_through() {
        assert_eq!(normalize_grade("AE"), "AE");
        assert_eq!(normalize_grade(""), "");
    }

    #[test]
    fn test_area_conversion() {
        // One square mile, to the source's own constant.
        let sq_miles = square_meters_to_miles(2_589_988.11);
        assert!((sq_miles - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_grade_range_formatting() {
        let row = DistrictRow {
            district_id: "2502790".to_string(),
            name: "Boston".to_string(),
            state_code: "25".to_string(),
            grade_lowest: "PK".to_string(),
            grade_highest: "12".to_string(),
            land_area_m2: 0.0,
            water_area_m2: 0.0,
            school_year: "2023-2024".to_string(),
            bbox: Bbox::new(0.0, 0.0, 1.0, 1.0),
            centroid_lng: 0.5,
            centroid_lat: 0.5,
        };
        assert_eq!(row.grade_range(), "Pre-K - 12");
    }

    #[test]
    fn test_row_crc_is_deterministic_and_sensitive() {
        let bbox = Bbox::new(-100.0, 40.0, -99.0, 41.0);

        let mut a = crc32fast::Hasher::new();
        fold_row_crc(&mut a, "0600001", &bbox);
        let mut b = crc32fast::Hasher::new();
        fold_row_crc(&mut b, "0600001", &bbox);
        assert_eq!(a.finalize(), b.finalize());

        let mut c = crc32fast::Hasher::new();
        fold_row_crc(&mut c, "0600001", &Bbox::new(-100.0, 40.0, -99.0, 41.5));
        let mut d = crc32fast::Hasher::new();
        fold_row_crc(&mut d, "0600001", &bbox);
        assert_ne!(c.finalize(), d.finalize());
    }
}
