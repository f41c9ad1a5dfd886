//! Shared fixture: a small district shapefile written through the real
//! writer, built into a store through the real pipeline.
//!
//! Layout (all inside the accepted coordinate window):
//! - 0800001 "Alder Creek School District"  square lng [-100,-99], lat [40,41]
//! - 0800002 "Birch Hollow School District" square lng [-99,-98], lat [40,41]
//! - 5600003 "Cedar Basin Unified"          square lng [-108,-107], lat [43,44]
//!   with a hole covering lng [-107.6,-107.4], lat [43.4,43.6]

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use shapefile::dbase::{FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing};

use district_locator::builder::{BuildOptions, StoreBuilder};
use district_locator::engine::{EngineConfig, LookupEngine};
use district_locator::reader::ShapefileReader;

pub struct FixtureDistrict {
    pub geoid: &'static str,
    pub name: &'static str,
    pub state_fips: &'static str,
    pub lo_grade: &'static str,
    pub hi_grade: &'static str,
    pub land_area_m2: f64,
    pub rings: Vec<PolygonRing<Point>>,
}

pub fn square_ring(min_lng: f64, min_lat: f64, size: f64) -> Vec<Point> {
    vec![
        Point::new(min_lng, min_lat),
        Point::new(min_lng, min_lat + size),
        Point::new(min_lng + size, min_lat + size),
        Point::new(min_lng + size, min_lat),
        Point::new(min_lng, min_lat),
    ]
}

pub fn fixture_districts() -> Vec<FixtureDistrict> {
    vec![
        FixtureDistrict {
            geoid: "0800001",
            name: "Alder Creek School District",
            state_fips: "08",
            lo_grade: "PK",
            hi_grade: "12",
            // Exactly 1000 square miles.
            land_area_m2: 2_589_988_110.0,
            rings: vec![PolygonRing::Outer(square_ring(-100.0, 40.0, 1.0))],
        },
        FixtureDistrict {
            geoid: "0800002",
            name: "Birch Hollow School District",
            state_fips: "08",
            lo_grade: "KG",
            hi_grade: "12",
            land_area_m2: 9_000_000_000.0,
            rings: vec![PolygonRing::Outer(square_ring(-99.0, 40.0, 1.0))],
        },
        FixtureDistrict {
            geoid: "5600003",
            name: "Cedar Basin Unified",
            state_fips: "56",
            lo_grade: "01",
            hi_grade: "08",
            land_area_m2: 8_500_000_000.0,
            rings: vec![
                PolygonRing::Outer(square_ring(-108.0, 43.0, 1.0)),
                PolygonRing::Inner(square_ring(-107.6, 43.4, 0.2)),
            ],
        },
    ]
}

fn record_for(district: &FixtureDistrict) -> Record {
    let mut record = Record::default();
    record.insert(
        "GEOID".to_string(),
        FieldValue::Character(Some(district.geoid.to_string())),
    );
    record.insert(
        "NAME".to_string(),
        FieldValue::Character(Some(district.name.to_string())),
    );
    record.insert(
        "STATEFP".to_string(),
        FieldValue::Character(Some(district.state_fips.to_string())),
    );
    record.insert(
        "LOGRADE".to_string(),
        FieldValue::Character(Some(district.lo_grade.to_string())),
    );
    record.insert(
        "HIGRADE".to_string(),
        FieldValue::Character(Some(district.hi_grade.to_string())),
    );
    record.insert(
        "ALAND".to_string(),
        FieldValue::Numeric(Some(district.land_area_m2)),
    );
    record.insert("AWATER".to_string(), FieldValue::Numeric(Some(0.0)));
    record.insert(
        "SCHOOLYEAR".to_string(),
        FieldValue::Character(Some("2023-2024".to_string())),
    );
    record
}

fn table_builder() -> TableWriterBuilder {
    TableWriterBuilder::new()
        .add_character_field("GEOID".try_into().unwrap(), 20)
        .add_character_field("NAME".try_into().unwrap(), 80)
        .add_character_field("STATEFP".try_into().unwrap(), 2)
        .add_character_field("LOGRADE".try_into().unwrap(), 2)
        .add_character_field("HIGRADE".try_into().unwrap(), 2)
        .add_numeric_field("ALAND".try_into().unwrap(), 14, 0)
        .add_numeric_field("AWATER".try_into().unwrap(), 14, 0)
        .add_character_field("SCHOOLYEAR".try_into().unwrap(), 9)
}

/// Write the fixture districts (plus any extras) as a real `.shp`/`.dbf`
/// pair; returns both paths.
pub fn write_fixture_shapefile(
    dir: &Path,
    extras: &[(FixtureDistrict, &str)],
) -> (PathBuf, PathBuf) {
    let shp = dir.join("districts.shp");
    let mut writer = shapefile::Writer::from_path(&shp, table_builder()).unwrap();

    for district in fixture_districts() {
        let polygon = Polygon::with_rings(district.rings.clone());
        writer
            .write_shape_and_record(&polygon, &record_for(&district))
            .unwrap();
    }
    for (district, geoid_override) in extras {
        let mut record = record_for(district);
        record.insert(
            "GEOID".to_string(),
            FieldValue::Character(Some(geoid_override.to_string())),
        );
        let polygon = Polygon::with_rings(district.rings.clone());
        writer.write_shape_and_record(&polygon, &record).unwrap();
    }
    drop(writer);

    let dbf = shp.with_extension("dbf");
    (shp, dbf)
}

/// A source with zero features, for empty-store behavior.
pub fn write_empty_shapefile(dir: &Path) -> (PathBuf, PathBuf) {
    let shp = dir.join("empty.shp");
    let writer = shapefile::Writer::from_path(&shp, table_builder()).unwrap();
    drop(writer);
    let dbf = shp.with_extension("dbf");
    (shp, dbf)
}

/// Full pipeline: fixture shapefile -> built store. Returns the store path.
pub async fn build_fixture_store(dir: &Path) -> PathBuf {
    let (shp, dbf) = write_fixture_shapefile(dir, &[]);
    let store_path = dir.join("districts.db");

    let mut reader = ShapefileReader::open(&shp, &dbf).unwrap();
    let builder = StoreBuilder::new(&store_path, BuildOptions::default());
    builder.build(&mut reader, |_| {}).await.unwrap();

    store_path
}

pub async fn engine_for(store_path: &Path, lru_capacity: usize) -> LookupEngine {
    LookupEngine::open(EngineConfig {
        store_path: store_path.to_path_buf(),
        lru_capacity,
        batch_max: 100,
    })
    .await
    .unwrap()
}
