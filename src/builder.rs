//! Offline store writer.
//!
//! Builds the persistent district store from a shapefile stream: all rows in
//! one transaction, metadata header last, then an analyze/compaction pass.
//! Output lands in a `.partial` sibling that is atomically renamed onto the
//! target path, so a failed build never leaves a half-written store.

use std::path::PathBuf;

use rayon::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::Result;
use crate::geometry::{encode_multipolygon, Bbox};
use crate::normalize::{normalize, NormalizedDistrict, DEFAULT_TOLERANCE};
use crate::reader::{RawFeature, ShapefileReader};
use crate::store::{fold_row_crc, GEOMETRY_ENCODING, STORE_VERSION};

/// Features normalized per rayon batch.
const CHUNK_SIZE: usize = 256;

const SCHEMA: &[&str] = &[
    "CREATE TABLE districts (
        district_id   TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        state_code    TEXT NOT NULL,
        grade_lowest  TEXT NOT NULL,
        grade_highest TEXT NOT NULL,
        land_area_m2  REAL NOT NULL,
        water_area_m2 REAL NOT NULL,
        school_year   TEXT NOT NULL,
        min_lng REAL NOT NULL,
        min_lat REAL NOT NULL,
        max_lng REAL NOT NULL,
        max_lat REAL NOT NULL,
        centroid_lng REAL NOT NULL,
        centroid_lat REAL NOT NULL,
        geometry BLOB NOT NULL
    )",
    "CREATE INDEX districts_bbox ON districts (min_lng, max_lng, min_lat, max_lat)",
    "CREATE INDEX districts_state ON districts (state_code)",
    "CREATE TABLE store_meta (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        builder_version   INTEGER NOT NULL,
        source_file       TEXT NOT NULL,
        school_year       TEXT NOT NULL,
        tolerance         REAL NOT NULL,
        district_count    INTEGER NOT NULL,
        geometry_encoding TEXT NOT NULL,
        row_crc           INTEGER NOT NULL
    )",
];

/// Build-time knobs.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Simplification tolerance in degrees.
    pub tolerance: f64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// What a finished build did, by the numbers.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub districts_written: u64,
    pub features_read: u64,
    pub skipped_non_polygon: u64,
    pub skipped_missing_geoid: u64,
    pub rejected_invalid_geometry: u64,
    pub school_year: String,
}

/// Writes the persistent district store.
pub struct StoreBuilder {
    out_path: PathBuf,
    options: BuildOptions,
}

impl StoreBuilder {
    pub fn new(out_path: impl Into<PathBuf>, options: BuildOptions) -> Self {
        Self {
            out_path: out_path.into(),
            options,
        }
    }

    /// Run the full ingest. `progress` is called with the number of source
    /// features consumed so far.
    pub async fn build(
        &self,
        reader: &mut ShapefileReader,
        mut progress: impl FnMut(u64),
    ) -> Result<BuildReport> {
        let result = self.build_partial(reader, &mut progress).await;
        if result.is_err() {
            let _ = std::fs::remove_file(self.partial_path());
        }
        result
    }

    async fn build_partial(
        &self,
        reader: &mut ShapefileReader,
        progress: &mut impl FnMut(u64),
    ) -> Result<BuildReport> {
        let partial = self.partial_path();
        // A stale partial from a crashed run would fail CREATE TABLE.
        let _ = std::fs::remove_file(&partial);

        let connect = SqliteConnectOptions::new()
            .filename(&partial)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Memory);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let source_name = reader.source_name().to_string();
        let tolerance = self.options.tolerance;

        let mut tx = pool.begin().await?;
        let mut crc_rows: Vec<(String, Bbox)> = Vec::new();
        let mut written: u64 = 0;
        let mut rejected: u64 = 0;
        let mut school_year = String::new();

        let mut features = reader.features();
        loop {
            let mut chunk: Vec<RawFeature> = Vec::with_capacity(CHUNK_SIZE);
            while chunk.len() < CHUNK_SIZE {
                match features.next() {
                    Some(Ok(feature)) => chunk.push(feature),
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
            if chunk.is_empty() {
                break;
            }

            let chunk_len = chunk.len() as u64;
            let normalized: Vec<NormalizedDistrict> = chunk
                .into_par_iter()
                .filter_map(|feature| normalize(feature, tolerance))
                .collect();
            rejected += chunk_len - normalized.len() as u64;

            for district in normalized {
                if school_year.is_empty() && !district.school_year.is_empty() {
                    school_year = district.school_year.clone();
                }
                crc_rows.push((district.district_id.clone(), district.bbox));
                insert_district(&mut tx, district).await?;
                written += 1;
            }

            progress(features.read() as u64);
        }

        let report = BuildReport {
            districts_written: written,
            features_read: features.read() as u64,
            skipped_non_polygon: features.skipped_non_polygon(),
            skipped_missing_geoid: features.skipped_missing_geoid(),
            rejected_invalid_geometry: rejected,
            school_year: school_year.clone(),
        };
        drop(features);

        // The CRC is order-independent of insert order: rows fold sorted by id.
        crc_rows.sort_by(|a, b| a.0.cmp(&b.0));
        let mut hasher = crc32fast::Hasher::new();
        for (district_id, bbox) in &crc_rows {
            fold_row_crc(&mut hasher, district_id, bbox);
        }
        let row_crc = hasher.finalize();

        sqlx::query(
            "INSERT INTO store_meta
                (id, builder_version, source_file, school_year, tolerance,
                 district_count, geometry_encoding, row_crc)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(STORE_VERSION as i64)
        .bind(&source_name)
        .bind(if school_year.is_empty() { "unknown" } else { school_year.as_str() })
        .bind(tolerance)
        .bind(written as i64)
        .bind(GEOMETRY_ENCODING)
        .bind(row_crc as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        run_analyze_pass(&pool).await?;
        pool.close().await;

        std::fs::rename(&partial, &self.out_path)?;
        Ok(report)
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self
            .out_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "districts".into());
        name.push(".partial");
        self.out_path.with_file_name(name)
    }
}

async fn insert_district(
    tx: &mut Transaction<'_, Sqlite>,
    district: NormalizedDistrict,
) -> Result<()> {
    let NormalizedDistrict {
        district_id,
        name,
        state_code,
        grade_lowest,
        grade_highest,
        land_area_m2,
        water_area_m2,
        school_year,
        bbox,
        centroid_lng,
        centroid_lat,
        geometry,
    } = district;

    let blob = encode_multipolygon(geometry)?;

    sqlx::query(
        "INSERT INTO districts
            (district_id, name, state_code, grade_lowest, grade_highest,
             land_area_m2, water_area_m2, school_year,
             min_lng, min_lat, max_lng, max_lat,
             centroid_lng, centroid_lat, geometry)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )
    .bind(district_id)
    .bind(name)
    .bind(state_code)
    .bind(grade_lowest)
    .bind(grade_highest)
    .bind(land_area_m2)
    .bind(water_area_m2)
    .bind(school_year)
    .bind(bbox.min_lng)
    .bind(bbox.min_lat)
    .bind(bbox.max_lng)
    .bind(bbox.max_lat)
    .bind(centroid_lng)
    .bind(centroid_lat)
    .bind(blob)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Refresh planner statistics, then compact. Keeps read-time query plans
/// stable across releases of the store.
async fn run_analyze_pass(pool: &SqlitePool) -> Result<()> {
    sqlx::query("ANALYZE").execute(pool).await?;
    sqlx::query("VACUUM").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_is_a_sibling() {
        let builder = StoreBuilder::new("/data/stores/sy2324.db", BuildOptions::default());
        assert_eq!(
            builder.partial_path(),
            PathBuf::from("/data/stores/sy2324.db.partial")
        );
    }

    #[test]
    fn test_default_tolerance() {
        let options = BuildOptions::default();
        assert!((options.tolerance - 1e-4).abs() < 1e-12);
    }
}
