use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// 2D elevation or uncertainty band (row-major, top-to-bottom in memory)
pub type BandGrid = Array2<f32>;

/// 2D per-cell provenance references into the value table
pub type KeyGrid = Array2<u16>;

/// Key value for cells with no contributing record. Stored keys are
/// value-table index + 1, so index 0 never aliases the background.
pub const KEY_UNASSIGNED: u16 = 0;

/// Schema version written to converted containers.
pub const TARGET_VERSION: &str = "2.1.0";

/// Metadata profile the value-table records are stored under.
pub const METADATA_PROFILE: &str = "NOAA_OCS_2022_10";

/// Band datasets a container exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandKind {
    Elevation,
    Uncertainty,
}

impl std::fmt::Display for BandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BandKind::Elevation => write!(f, "elevation"),
            BandKind::Uncertainty => write!(f, "uncertainty"),
        }
    }
}

/// Shape and spatial registration shared by every surface in one composite
#[derive(Debug, Clone, PartialEq)]
pub struct BaseGeometry {
    pub rows: usize,
    pub cols: usize,
    /// (x, y) cell resolution
    pub cell_size: (f64, f64),
    /// Southwest corner coordinate
    pub origin: (f64, f64),
    /// Sentinel marking unset cells, compared with exact equality
    pub nodata: f32,
}

/// Immutable in-memory raster pair read from one source container
#[derive(Debug, Clone)]
pub struct GridSurface {
    pub rows: usize,
    pub cols: usize,
    pub cell_size: (f64, f64),
    pub origin: (f64, f64),
    pub nodata: f32,
    pub elevation: BandGrid,
    pub uncertainty: BandGrid,
}

impl GridSurface {
    /// Build a surface from its bands, validating that both match the
    /// declared shape.
    pub fn new(
        geometry: BaseGeometry,
        elevation: BandGrid,
        uncertainty: BandGrid,
    ) -> BagResult<Self> {
        if geometry.rows == 0 || geometry.cols == 0 {
            return Err(BagError::GeometryMismatch(format!(
                "surface shape must be positive, got {}x{}",
                geometry.rows, geometry.cols
            )));
        }
        let expected = (geometry.rows, geometry.cols);
        if elevation.dim() != expected || uncertainty.dim() != expected {
            return Err(BagError::GeometryMismatch(format!(
                "band shapes {:?}/{:?} do not match declared {}x{}",
                elevation.dim(),
                uncertainty.dim(),
                geometry.rows,
                geometry.cols
            )));
        }
        Ok(Self {
            rows: geometry.rows,
            cols: geometry.cols,
            cell_size: geometry.cell_size,
            origin: geometry.origin,
            nodata: geometry.nodata,
            elevation,
            uncertainty,
        })
    }

    pub fn geometry(&self) -> BaseGeometry {
        BaseGeometry {
            rows: self.rows,
            cols: self.cols,
            cell_size: self.cell_size,
            origin: self.origin,
            nodata: self.nodata,
        }
    }

    /// A cell contributes to compositing iff its elevation sample is set.
    pub fn is_set(&self, row: usize, col: usize) -> bool {
        self.elevation[[row, col]] != self.nodata
    }
}

/// One row of the georeferenced-metadata value table.
///
/// Field set and defaults follow the NOAA OCS 2022-10 record template:
/// boolean detection/coverage flags, fixed + variable (fractional) feature
/// size and horizontal uncertainty, survey date range, attribution, and an
/// SPDX-style license reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub significant_features: bool,
    pub least_depth: bool,
    pub feature_size_fixed: f32,
    /// Fraction in [0, 1], already divided down from the percent notation
    pub feature_size_var: f32,
    pub full_coverage: bool,
    pub bathy_coverage: bool,
    pub horizontal_uncert_fixed: f32,
    /// Fraction in [0, 1]
    pub horizontal_uncert_var: f32,
    pub survey_date_start: NaiveDate,
    pub survey_date_end: NaiveDate,
    pub source_institution: String,
    pub source_survey_id: String,
    /// Reserved, always 0 in the current profile
    pub source_survey_index: u32,
    pub license_name: String,
    pub license_url: String,
}

/// Error types for BAG conversion and compositing
#[derive(Debug, thiserror::Error)]
pub enum BagError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed metadata document: {0}")]
    MalformedMetadata(String),

    #[error("No provenance found for grid '{grid}' in '{path}'")]
    ProvenanceNotFound { grid: String, path: String },

    #[error("Container write failed: {0}")]
    ContainerWrite(String),

    #[error("Embedded metadata document has no lineage section")]
    LineageSectionMissing,

    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("Conversion job has no usable layers")]
    EmptyJob,

    #[error("Container access error: {0}")]
    Container(String),

    #[error("Invalid job specification: {0}")]
    InvalidJob(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),
}

/// Result type for BAG operations
pub type BagResult<T> = Result<T, BagError>;
