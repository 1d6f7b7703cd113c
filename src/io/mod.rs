//! Input/output modules: container access, survey descriptions, job specs

pub mod container;
pub mod job;
pub mod survey;

// Re-export main types
pub use container::{
    describe, read_surface, ContainerFile, ContainerHandle, ContainerStore, ContainerSummary,
    GeorefLayer, MemoryStore, OpenMode,
};
pub use job::{JobLayer, JobSpec};
pub use survey::{extract_record, SurveyMetadata};
