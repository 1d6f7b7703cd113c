//! bagmerge: a BAG 1.x to 2.x compositing converter
//!
//! This library merges multiple spatially-aligned BAG 1.x elevation
//! containers into one BAG 2.1 container: elevation and uncertainty bands
//! are composited under an explicit precedence order, a per-cell key layer
//! records which source supplied each output cell, and every source surface
//! becomes one addressable record in the container's georeferenced metadata
//! value table. The embedded ISO metadata document is kept consistent with
//! the binary grids through corner-point correction and a lineage entry.
//!
//! The container's low-level binary format is owned by an external SDK and
//! reached through the [`io::container::ContainerStore`] seam.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types
pub use types::{
    BagError, BagResult, BandGrid, BandKind, BaseGeometry, GridSurface, KeyGrid,
    ProvenanceRecord, KEY_UNASSIGNED, METADATA_PROFILE, TARGET_VERSION,
};

pub use io::container::{
    describe, read_surface, ContainerFile, ContainerHandle, ContainerStore, ContainerSummary,
    MemoryStore, OpenMode,
};
pub use io::job::{JobLayer, JobSpec};
pub use io::survey::{extract_record, SurveyMetadata};

pub use crate::core::composite::{composite, CompositeLayers};
pub use crate::core::convert::{run_job, JobReport};
pub use crate::core::corner_fix::fix_corner_points;
pub use crate::core::lineage::PROCESS_DESCRIPTION;
pub use crate::core::value_table::ValueTable;
