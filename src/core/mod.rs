//! Core compositing and conversion modules

pub mod composite;
pub mod convert;
pub mod corner_fix;
pub mod lineage;
pub mod value_table;

// Re-export main types
pub use composite::{composite, CompositeLayers};
pub use convert::{run_job, JobReport};
pub use corner_fix::{corrected_document, fix_corner_points};
pub use lineage::{append_process_step, finalize_document, PROCESS_DESCRIPTION};
pub use value_table::{key_for, ValueTable};
