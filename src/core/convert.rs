//! Conversion orchestrator.
//!
//! Sequences a whole multi-layer job: geometry correction for every input,
//! provenance extraction and layer filtering, compositing in precedence
//! order, container population, and document finalization. The original
//! inputs are never mutated in place; every corrective and compositing step
//! works on copies, and a failure after the output copy exists removes it so
//! no partially-written container is ever promoted.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::core::composite::composite;
use crate::core::corner_fix::fix_corner_points;
use crate::core::lineage::{finalize_document, PROCESS_DESCRIPTION};
use crate::core::value_table::ValueTable;
use crate::io::container::{read_surface, ContainerStore, OpenMode};
use crate::io::job::{JobLayer, JobSpec};
use crate::io::survey::extract_record;
use crate::types::{BagError, BagResult, BandKind, GridSurface, METADATA_PROFILE};

/// Keys dataset storage parameters for the georeferenced metadata layer.
const KEYS_CHUNK_SIZE: usize = 100;
const KEYS_COMPRESSION_LEVEL: u8 = 6;

/// Outcome of a completed conversion job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub output: PathBuf,
    /// Layer names composited, in precedence order
    pub composited: Vec<String>,
    /// Layer names excluded for missing provenance
    pub excluded: Vec<String>,
    pub records_written: usize,
}

/// Path of the geometry-corrected copy of an input container.
fn fixed_path(data: &Path) -> BagResult<PathBuf> {
    let stem = data.file_stem().ok_or_else(|| {
        BagError::InvalidJob(format!("no usable file name in '{}'", data.display()))
    })?;
    let mut name = stem.to_os_string();
    name.push("_fixed");
    if let Some(ext) = data.extension() {
        name.push(".");
        name.push(ext);
    }
    Ok(data.with_file_name(name))
}

/// Run one conversion job end to end.
///
/// Fatal failures (geometry correction, compositing, container writes,
/// finalization) abort the job; an output file only exists afterwards if
/// every phase, including document finalization, completed.
pub fn run_job(store: &dyn ContainerStore, spec: &JobSpec) -> BagResult<JobReport> {
    if spec.layers.is_empty() {
        return Err(BagError::EmptyJob);
    }
    log::info!(
        "starting conversion of {} layer(s) -> '{}'",
        spec.layers.len(),
        spec.output.display()
    );

    // Geometry correction is a precondition for everything downstream; a
    // single bad input fails the whole job before any output exists.
    let mut corrected: Vec<(&JobLayer, PathBuf)> = Vec::new();
    for layer in &spec.layers {
        let fixed = fixed_path(&layer.data)?;
        if let Err(e) = fix_corner_points(store, &layer.data, &fixed) {
            log::error!(
                "corner fix failed for layer '{}' ('{}'): {}",
                layer.name,
                layer.data.display(),
                e
            );
            return Err(e);
        }
        corrected.push((layer, fixed));
    }

    // A layer without a provenance record cannot be attributed in the key
    // layer, so it drops out of the job entirely.
    let mut table = ValueTable::new();
    let mut active: Vec<(&JobLayer, PathBuf, u16)> = Vec::new();
    let mut excluded: Vec<String> = Vec::new();
    for (layer, fixed) in corrected {
        let grid_name = layer.grid_name()?;
        match extract_record(&layer.survey, &grid_name) {
            Ok(record) => {
                let index = table.add_record(record)?;
                log::info!("record {index} defined for layer '{}'", layer.name);
                active.push((layer, fixed, index));
            }
            Err(e @ BagError::ProvenanceNotFound { .. }) => {
                log::warn!("excluding layer '{}': {e}", layer.name);
                excluded.push(layer.name.clone());
            }
            Err(e) => return Err(e),
        }
    }
    if active.is_empty() {
        log::error!("no layers with usable provenance remain; aborting");
        return Err(BagError::EmptyJob);
    }

    // The highest-precedence layer is the structural template: it is the
    // authoritative, non-interpolated surface.
    let template = active.last().expect("active is non-empty").1.clone();
    log::info!("using '{}' as the output template", template.display());
    store.copy(&template, &spec.output)?;

    match populate_output(store, spec, &active, &table) {
        Ok(()) => {
            let report = JobReport {
                output: spec.output.clone(),
                composited: active.iter().map(|(l, _, _)| l.name.clone()).collect(),
                excluded,
                records_written: table.len(),
            };
            log::info!(
                "✅ conversion complete: {} layer(s) composited, {} record(s) written to '{}'",
                report.composited.len(),
                report.records_written,
                report.output.display()
            );
            Ok(report)
        }
        Err(e) => {
            let _ = store.remove(&spec.output);
            Err(e)
        }
    }
}

fn populate_output(
    store: &dyn ContainerStore,
    spec: &JobSpec,
    active: &[(&JobLayer, PathBuf, u16)],
    table: &ValueTable,
) -> BagResult<()> {
    // Write phase 1: georeferenced metadata layer and value table. The
    // handle is closed before any raster-level read below.
    {
        let mut out = store.open(&spec.output, OpenMode::ReadWrite)?;
        out.create_georef_layer(
            "Elevation",
            METADATA_PROFILE,
            KEYS_CHUNK_SIZE,
            KEYS_COMPRESSION_LEVEL,
        )?;
        out.write_value_table(table.records())?;
        out.rename_georef_layer(METADATA_PROFILE)?;
    }

    // Read phase: overlay access against the corrected copies.
    let mut layers: Vec<(GridSurface, u16)> = Vec::with_capacity(active.len());
    for (layer, fixed, index) in active {
        let handle = store.open(fixed, OpenMode::Read)?;
        let surface = read_surface(handle.as_ref())?;
        log::info!(
            "read layer '{}': {}x{} cells",
            layer.name,
            surface.rows,
            surface.cols
        );
        layers.push((surface, *index));
    }
    let base = layers.last().expect("active is non-empty").0.geometry();

    let merged = composite(&base, &layers)?;
    let for_storage = merged.flipped_for_storage();

    // Write phase 2: composite bands and keys.
    {
        let mut out = store.open(&spec.output, OpenMode::ReadWrite)?;
        out.write_band(BandKind::Elevation, &for_storage.elevation)?;
        out.write_band(BandKind::Uncertainty, &for_storage.uncertainty)?;
        out.write_keys(&for_storage.keys)?;
    }

    // Finalization: version and process history. A document without a
    // lineage section is logged and left as-is.
    let mut out = store.open(&spec.output, OpenMode::ReadWrite)?;
    match finalize_document(out.as_mut(), PROCESS_DESCRIPTION, Utc::now()) {
        Ok(()) => Ok(()),
        Err(BagError::LineageSectionMissing) => {
            log::warn!("embedded document has no lineage section; process step skipped");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
