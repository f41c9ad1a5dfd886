//! Streaming reader for the NCES EDGE shapefile + attribute table.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use geo::{coord, Coord, LineString, MultiPolygon, Polygon};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Shape};

use crate::error::{DistrictError, Result};
use crate::logger;

/// One raw feature from the source: the attribute projection the store
/// cares about, plus the full-resolution geometry.
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub geoid: String,
    pub name: String,
    pub state_fips: String,
    pub lo_grade: String,
    pub hi_grade: String,
    pub land_area_m2: f64,
    pub water_area_m2: f64,
    pub school_year: String,
    pub geometry: MultiPolygon<f64>,
}

/// Single-pass reader over an `.shp`/`.dbf` pair.
///
/// The pass is forward-only and not restartable; open a new reader to
/// re-read the source.
pub struct ShapefileReader {
    reader: shapefile::Reader<BufReader<File>, BufReader<File>>,
    feature_count: usize,
    source_name: String,
}

impl std::fmt::Debug for ShapefileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapefileReader")
            .field("feature_count", &self.feature_count)
            .field("source_name", &self.source_name)
            .finish()
    }
}

impl ShapefileReader {
    /// Open the geometry file and its attribute table.
    ///
    /// Fails with `SourceFormat` when either header is malformed or when the
    /// attribute record count disagrees with the shape count.
    pub fn open(shp_path: &Path, dbf_path: &Path) -> Result<Self> {
        let dbf_records = read_dbf_record_count(dbf_path)?;

        let shape_reader = shapefile::ShapeReader::from_path(shp_path).map_err(|e| {
            DistrictError::SourceFormat(format!("{}: {}", shp_path.display(), e))
        })?;
        let dbase_reader = shapefile::dbase::Reader::from_path(dbf_path).map_err(|e| {
            DistrictError::SourceFormat(format!("{}: {}", dbf_path.display(), e))
        })?;

        let reader = shapefile::Reader::new(shape_reader, dbase_reader);
        let feature_count = reader
            .shape_count()
            .map_err(|e| DistrictError::SourceFormat(format!("{}: {}", shp_path.display(), e)))?;

        if feature_count != dbf_records as usize {
            return Err(DistrictError::SourceFormat(format!(
                "{} shapes but {} attribute records",
                feature_count, dbf_records
            )));
        }

        let source_name = shp_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| shp_path.display().to_string());

        Ok(Self {
            reader,
            feature_count,
            source_name,
        })
    }

    /// Number of features the source headers declare.
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Name of the source file, recorded in the store header.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Stream the features. Non-polygonal shapes and records without a GEOID
    /// are skipped with counted warnings, available on the iterator after
    /// the pass.
    pub fn features(&mut self) -> Features<'_> {
        Features {
            inner: Box::new(self.reader.iter_shapes_and_records()),
            expected: self.feature_count,
            read: 0,
            skipped_non_polygon: 0,
            skipped_missing_geoid: 0,
            finished: false,
        }
    }
}

/// Lazy feature stream over a [`ShapefileReader`].
pub struct Features<'a> {
    inner: Box<
        dyn Iterator<Item = std::result::Result<(Shape, Record), shapefile::Error>> + 'a,
    >,
    expected: usize,
    read: usize,
    skipped_non_polygon: u64,
    skipped_missing_geoid: u64,
    finished: bool,
}

impl Features<'_> {
    /// Records pulled from the source so far, skipped ones included.
    pub fn read(&self) -> usize {
        self.read
    }

    /// Records skipped because the shape was not a polygon.
    pub fn skipped_non_polygon(&self) -> u64 {
        self.skipped_non_polygon
    }

    /// Records skipped because GEOID was absent or empty.
    pub fn skipped_missing_geoid(&self) -> u64 {
        self.skipped_missing_geoid
    }
}

impl Iterator for Features<'_> {
    type Item = Result<RawFeature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.inner.next() {
                Some(Ok((shape, record))) => {
                    self.read += 1;

                    let polygon = match shape {
                        Shape::Polygon(p) => p,
                        other => {
                            self.skipped_non_polygon += 1;
                            logger::warn(&format!(
                                "skipping record {}: shape type {:?} is not a polygon",
                                self.read,
                                other.shapetype()
                            ));
                            continue;
                        }
                    };

                    let geoid = character_field(&record, "GEOID");
                    if geoid.is_empty() {
                        self.skipped_missing_geoid += 1;
                        logger::warn(&format!("skipping record {}: no GEOID", self.read));
                        continue;
                    }

                    return Some(Ok(RawFeature {
                        geoid,
                        name: character_field(&record, "NAME"),
                        state_fips: character_field(&record, "STATEFP"),
                        lo_grade: character_field(&record, "LOGRADE"),
                        hi_grade: character_field(&record, "HIGRADE"),
                        land_area_m2: numeric_field(&record, "ALAND"),
                        water_area_m2: numeric_field(&record, "AWATER"),
                        school_year: character_field(&record, "SCHOOLYEAR"),
                        geometry: polygon_to_multipolygon(&polygon),
                    }));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(DistrictError::SourceFormat(format!(
                        "read failed after record {}: {}",
                        self.read, e
                    ))));
                }
                None => {
                    self.finished = true;
                    if self.read != self.expected {
                        return Some(Err(DistrictError::SourceFormat(format!(
                            "header declares {} features but the stream ended after {}",
                            self.expected, self.read
                        ))));
                    }
                    return None;
                }
            }
        }
    }
}

/// Group shapefile rings into geo polygons.
///
/// Ring order in a shapefile is each exterior followed by its holes; the
/// `Outer`/`Inner` tags carry which is which.
fn polygon_to_multipolygon(polygon: &shapefile::Polygon) -> MultiPolygon<f64> {
    let mut parts: Vec<Polygon<f64>> = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes: Vec<LineString<f64>> = Vec::new();

    for ring in polygon.rings() {
        let line = LineString::from(closed_coords(ring.points()));
        match ring {
            PolygonRing::Outer(_) => {
                if let Some(ext) = exterior.take() {
                    parts.push(Polygon::new(ext, std::mem::take(&mut holes)));
                }
                exterior = Some(line);
            }
            PolygonRing::Inner(_) => holes.push(line),
        }
    }
    if let Some(ext) = exterior {
        parts.push(Polygon::new(ext, holes));
    }

    MultiPolygon::new(parts)
}

/// Ring coordinates with the closing point enforced.
fn closed_coords(points: &[shapefile::Point]) -> Vec<Coord<f64>> {
    let mut coords: Vec<Coord<f64>> = points
        .iter()
        .map(|p| coord! { x: p.x, y: p.y })
        .collect();
    if let (Some(&first), Some(&last)) = (coords.first(), coords.last()) {
        if first != last {
            coords.push(first);
        }
    }
    coords
}

fn character_field(record: &Record, name: &str) -> String {
    match record.get(name) {
        Some(FieldValue::Character(Some(s))) => s.trim().to_string(),
        _ => String::new(),
    }
}

fn numeric_field(record: &Record, name: &str) -> f64 {
    match record.get(name) {
        Some(FieldValue::Numeric(Some(n))) => *n,
        Some(FieldValue::Float(Some(f))) => f64::from(*f),
        _ => 0.0,
    }
}

fn read_dbf_record_count(path: &Path) -> Result<u32> {
    let mut file = File::open(path).map_err(|e| {
        DistrictError::SourceFormat(format!("{}: {}", path.display(), e))
    })?;
    let mut header = [0u8; 32];
    file.read_exact(&mut header).map_err(|_| {
        DistrictError::SourceFormat(format!("{}: truncated DBF header", path.display()))
    })?;

    let header_len = u16::from_le_bytes([header[8], header[9]]);
    if header_len < 32 {
        return Err(DistrictError::SourceFormat(format!(
            "{}: implausible DBF header length {}",
            path.display(),
            header_len
        )));
    }

    Ok(u32::from_le_bytes([
        header[4], header[5], header[6], header[7],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, Contains, Point};
    use shapefile::Point as ShpPoint;

    fn square_ring(min_x: f64, min_y: f64, size: f64) -> Vec<ShpPoint> {
        vec![
            ShpPoint::new(min_x, min_y),
            ShpPoint::new(min_x, min_y + size),
            ShpPoint::new(min_x + size, min_y + size),
            ShpPoint::new(min_x + size, min_y),
            ShpPoint::new(min_x, min_y),
        ]
    }

    #[test]
    fn test_single_ring_polygon() {
        let polygon =
            shapefile::Polygon::with_rings(vec![PolygonRing::Outer(square_ring(0.0, 0.0, 1.0))]);
        let mp = polygon_to_multipolygon(&polygon);

        assert_eq!(mp.0.len(), 1);
        assert!((mp.unsigned_area() - 1.0).abs() < 1e-9);
        assert!(mp.contains(&Point::new(0.5, 0.5)));
    }

    #[test]
    fn test_hole_is_excluded() {
        let polygon = shapefile::Polygon::with_rings(vec![
            PolygonRing::Outer(square_ring(0.0, 0.0, 10.0)),
            PolygonRing::Inner(square_ring(4.0, 4.0, 2.0)),
        ]);
        let mp = polygon_to_multipolygon(&polygon);

        assert_eq!(mp.0.len(), 1);
        assert!(mp.contains(&Point::new(1.0, 1.0)));
        assert!(!mp.contains(&Point::new(5.0, 5.0)), "hole interior");
    }

    #[test]
    fn test_two_outer_rings_become_two_parts() {
        let polygon = shapefile::Polygon::with_rings(vec![
            PolygonRing::Outer(square_ring(0.0, 0.0, 1.0)),
            PolygonRing::Outer(square_ring(5.0, 5.0, 1.0)),
        ]);
        let mp = polygon_to_multipolygon(&polygon);

        assert_eq!(mp.0.len(), 2);
        assert!(mp.contains(&Point::new(0.5, 0.5)));
        assert!(mp.contains(&Point::new(5.5, 5.5)));
    }

    #[test]
    fn test_open_ring_is_closed() {
        let mut ring = square_ring(0.0, 0.0, 1.0);
        ring.pop(); // drop the closing point
        let coords = closed_coords(&ring);
        assert_eq!(coords.first(), coords.last());
        assert_eq!(coords.len(), 5);
    }
}
