use thiserror::Error;

#[derive(Error, Debug)]
pub enum DistrictError {
    #[error("Coordinate out of range: lat={lat}, lng={lng} (accepted: lat 18..72, lng -180..-65)")]
    CoordinateOutOfRange { lat: f64, lng: f64 },

    #[error("Coordinate is not a finite number")]
    CoordinateNotFinite,

    #[error("Malformed source data: {0}")]
    SourceFormat(String),

    #[error("Store not found: {0}")]
    StoreMissing(String),

    #[error("Store corrupt: {0}")]
    StoreCorrupt(String),

    #[error("Store was built by version {found}, newest supported is {supported}")]
    VersionMismatch { found: u32, supported: u32 },

    #[error("Failed to decode geometry for district {district_id}")]
    GeometryDecode { district_id: String },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Batch of {len} points exceeds the configured maximum of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DistrictError {
    /// Stable machine-readable kind, used by callers that serialize errors
    /// across a wire boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            DistrictError::CoordinateOutOfRange { .. } => "coordinate_out_of_range",
            DistrictError::CoordinateNotFinite => "coordinate_not_finite",
            DistrictError::SourceFormat(_) => "source_format",
            DistrictError::StoreMissing(_) => "store_missing",
            DistrictError::StoreCorrupt(_) => "store_corrupt",
            DistrictError::VersionMismatch { .. } => "version_mismatch",
            DistrictError::GeometryDecode { .. } => "geometry_decode",
            DistrictError::Cancelled => "cancelled",
            DistrictError::BatchTooLarge { .. } => "batch_too_large",
            DistrictError::Database(_) | DistrictError::Io(_) | DistrictError::Internal(_) => {
                "internal"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DistrictError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DistrictError::StoreMissing("districts.db".to_string());
        assert_eq!(err.to_string(), "Store not found: districts.db");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = DistrictError::CoordinateOutOfRange { lat: 0.0, lng: 0.0 };
        assert!(err.to_string().contains("lat=0"));
        assert!(err.to_string().contains("lng=0"));
    }

    #[test]
    fn test_version_mismatch_display() {
        let err = DistrictError::VersionMismatch { found: 9, supported: 1 };
        assert_eq!(
            err.to_string(),
            "Store was built by version 9, newest supported is 1"
        );
    }

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(
            DistrictError::CoordinateNotFinite.kind(),
            "coordinate_not_finite"
        );
        assert_eq!(
            DistrictError::GeometryDecode { district_id: "x".into() }.kind(),
            "geometry_decode"
        );
        assert_eq!(DistrictError::Internal("boom".into()).kind(), "internal");
    }
}
