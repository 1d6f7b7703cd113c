//! Container access layer.
//!
//! The on-disk BAG format (an HDF5-style hierarchical dataset file) is owned
//! by an external SDK; this module models the slice of it the converter needs
//! behind the [`ContainerStore`] seam: a version attribute, two f32 bands, an
//! embedded metadata document, and a renameable georeferenced-metadata group
//! holding a `keys` dataset and a value table. [`MemoryStore`] is the
//! in-process backend used by the tests and by callers that stage containers
//! themselves; an SDK-backed store implements the same traits.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ndarray::Array2;

use crate::types::{
    BagError, BagResult, BandGrid, BandKind, BaseGeometry, GridSurface, KeyGrid, ProvenanceRecord,
};

/// Access mode for an open container.
///
/// The container file is the one shared mutable resource of a job: a
/// `ReadWrite` handle is exclusive, `Read` handles are shared but exclude
/// writers. Locks are released when the handle is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// Georeferenced-metadata group: keys dataset plus the serialized value table.
#[derive(Debug, Clone)]
pub struct GeorefLayer {
    /// Group name; created under the band name and renamed to the profile
    pub name: String,
    /// Metadata profile the records conform to
    pub profile: String,
    pub chunk_size: usize,
    pub compression_level: u8,
    pub keys: KeyGrid,
    pub records: Vec<ProvenanceRecord>,
}

/// In-memory model of one container file.
#[derive(Debug, Clone)]
pub struct ContainerFile {
    version: String,
    geometry: BaseGeometry,
    elevation: BandGrid,
    uncertainty: BandGrid,
    metadata_doc: Vec<u8>,
    georef: Option<GeorefLayer>,
}

impl ContainerFile {
    pub fn new(
        version: &str,
        geometry: BaseGeometry,
        elevation: BandGrid,
        uncertainty: BandGrid,
        metadata_doc: Vec<u8>,
    ) -> BagResult<Self> {
        let expected = (geometry.rows, geometry.cols);
        if elevation.dim() != expected || uncertainty.dim() != expected {
            return Err(BagError::GeometryMismatch(format!(
                "band shapes {:?}/{:?} do not match container shape {}x{}",
                elevation.dim(),
                uncertainty.dim(),
                geometry.rows,
                geometry.cols
            )));
        }
        Ok(Self {
            version: version.to_string(),
            geometry,
            elevation,
            uncertainty,
            metadata_doc,
            georef: None,
        })
    }

    /// Container filled with the nodata sentinel, useful for staging tests.
    pub fn empty(version: &str, geometry: BaseGeometry, metadata_doc: Vec<u8>) -> Self {
        let shape = (geometry.rows, geometry.cols);
        let fill = Array2::from_elem(shape, geometry.nodata);
        Self {
            version: version.to_string(),
            geometry,
            elevation: fill.clone(),
            uncertainty: fill,
            metadata_doc,
            georef: None,
        }
    }
}

/// Open container resource.
///
/// All reads and writes against one container path go through a handle; the
/// backing store enforces the locking discipline and the handle releases its
/// lock on every exit path.
pub trait ContainerHandle {
    fn path(&self) -> &Path;
    fn mode(&self) -> OpenMode;

    fn version(&self) -> BagResult<String>;
    fn set_version(&mut self, version: &str) -> BagResult<()>;

    fn geometry(&self) -> BagResult<BaseGeometry>;
    fn read_band(&self, kind: BandKind) -> BagResult<BandGrid>;
    fn write_band(&mut self, kind: BandKind, data: &BandGrid) -> BagResult<()>;

    /// Embedded descriptive-metadata document, as raw bytes.
    fn metadata_document(&self) -> BagResult<Vec<u8>>;
    /// Replace the embedded document as a unit.
    fn replace_metadata_document(&mut self, doc: &[u8]) -> BagResult<()>;

    /// Create the georeferenced-metadata group with an all-unassigned keys
    /// dataset shaped to the container bands.
    fn create_georef_layer(
        &mut self,
        name: &str,
        profile: &str,
        chunk_size: usize,
        compression_level: u8,
    ) -> BagResult<()>;
    /// Rename the georeferenced-metadata group.
    fn rename_georef_layer(&mut self, name: &str) -> BagResult<()>;
    fn georef_name(&self) -> BagResult<Option<String>>;

    /// Replace the value table with `records`, preserving slice order.
    fn write_value_table(&mut self, records: &[ProvenanceRecord]) -> BagResult<()>;
    fn read_value_table(&self) -> BagResult<Vec<ProvenanceRecord>>;

    fn write_keys(&mut self, keys: &KeyGrid) -> BagResult<()>;
    fn read_keys(&self) -> BagResult<KeyGrid>;
}

/// Backend owning container files addressed by path.
pub trait ContainerStore {
    fn exists(&self, path: &Path) -> bool;
    /// Deep copy; the source is left untouched.
    fn copy(&self, src: &Path, dst: &Path) -> BagResult<()>;
    fn open(&self, path: &Path, mode: OpenMode) -> BagResult<Box<dyn ContainerHandle>>;
    fn remove(&self, path: &Path) -> BagResult<()>;
}

/// Read both bands and the registration attributes into a [`GridSurface`].
///
/// This is the read-only overlay path used during compositing, kept separate
/// from the write phases by the handle discipline. Band datasets are stored
/// bottom-to-top (row 0 = south); the overlay view is north-up, so rows are
/// flipped on read. Writers flip back symmetrically (see
/// `CompositeLayers::flipped_for_storage`).
pub fn read_surface(handle: &dyn ContainerHandle) -> BagResult<GridSurface> {
    let geometry = handle.geometry()?;
    let mut elevation = handle.read_band(BandKind::Elevation)?;
    let mut uncertainty = handle.read_band(BandKind::Uncertainty)?;
    elevation.invert_axis(ndarray::Axis(0));
    uncertainty.invert_axis(ndarray::Axis(0));
    GridSurface::new(geometry, elevation, uncertainty)
}

/// One-shot summary of a container's contents.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub path: PathBuf,
    pub version: String,
    pub rows: usize,
    pub cols: usize,
    pub nodata: f32,
    pub georef_name: Option<String>,
    pub record_count: usize,
}

pub fn describe(handle: &dyn ContainerHandle) -> BagResult<ContainerSummary> {
    let geometry = handle.geometry()?;
    let records = handle.read_value_table().unwrap_or_default();
    Ok(ContainerSummary {
        path: handle.path().to_path_buf(),
        version: handle.version()?,
        rows: geometry.rows,
        cols: geometry.cols,
        nodata: geometry.nodata,
        georef_name: handle.georef_name()?,
        record_count: records.len(),
    })
}

struct Entry {
    file: RefCell<ContainerFile>,
    readers: Cell<usize>,
    writer: Cell<bool>,
}

impl Entry {
    fn is_open(&self) -> bool {
        self.writer.get() || self.readers.get() > 0
    }
}

/// In-process container store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<PathBuf, Rc<Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a container at `path`. Fails if the path is currently open.
    pub fn insert(&self, path: &Path, file: ContainerFile) -> BagResult<()> {
        let mut entries = self.entries.borrow_mut();
        if let Some(existing) = entries.get(path) {
            if existing.is_open() {
                return Err(BagError::Container(format!(
                    "cannot replace '{}': container is open",
                    path.display()
                )));
            }
        }
        entries.insert(
            path.to_path_buf(),
            Rc::new(Entry {
                file: RefCell::new(file),
                readers: Cell::new(0),
                writer: Cell::new(false),
            }),
        );
        Ok(())
    }

    fn entry(&self, path: &Path) -> BagResult<Rc<Entry>> {
        self.entries
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| BagError::Container(format!("no container at '{}'", path.display())))
    }
}

impl ContainerStore for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.entries.borrow().contains_key(path)
    }

    fn copy(&self, src: &Path, dst: &Path) -> BagResult<()> {
        let entry = self.entry(src)?;
        if entry.writer.get() {
            return Err(BagError::Container(format!(
                "cannot copy '{}': container is open for writing",
                src.display()
            )));
        }
        let cloned = entry.file.borrow().clone();
        self.insert(dst, cloned)?;
        log::debug!("copied container '{}' -> '{}'", src.display(), dst.display());
        Ok(())
    }

    fn open(&self, path: &Path, mode: OpenMode) -> BagResult<Box<dyn ContainerHandle>> {
        let entry = self.entry(path)?;
        match mode {
            OpenMode::ReadWrite => {
                if entry.is_open() {
                    return Err(BagError::Container(format!(
                        "'{}' is already open; exclusive access required for writing",
                        path.display()
                    )));
                }
                entry.writer.set(true);
            }
            OpenMode::Read => {
                if entry.writer.get() {
                    return Err(BagError::Container(format!(
                        "'{}' is locked by a writer",
                        path.display()
                    )));
                }
                entry.readers.set(entry.readers.get() + 1);
            }
        }
        Ok(Box::new(MemoryHandle {
            path: path.to_path_buf(),
            mode,
            entry,
        }))
    }

    fn remove(&self, path: &Path) -> BagResult<()> {
        let mut entries = self.entries.borrow_mut();
        let is_open = entries
            .get(path)
            .map(|entry| entry.is_open())
            .ok_or_else(|| {
                BagError::Container(format!("no container at '{}'", path.display()))
            })?;
        if is_open {
            return Err(BagError::Container(format!(
                "cannot remove '{}': container is open",
                path.display()
            )));
        }
        entries.remove(path);
        Ok(())
    }
}

struct MemoryHandle {
    path: PathBuf,
    mode: OpenMode,
    entry: Rc<Entry>,
}

impl MemoryHandle {
    fn ensure_writable(&self) -> BagResult<()> {
        if self.mode != OpenMode::ReadWrite {
            return Err(BagError::Container(format!(
                "'{}' is open read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn with_georef_mut<T>(
        &mut self,
        op: impl FnOnce(&mut GeorefLayer) -> BagResult<T>,
    ) -> BagResult<T> {
        self.ensure_writable()?;
        let mut file = self.entry.file.borrow_mut();
        match file.georef.as_mut() {
            Some(layer) => op(layer),
            None => Err(BagError::ContainerWrite(format!(
                "'{}' has no georeferenced metadata layer",
                self.path.display()
            ))),
        }
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        match self.mode {
            OpenMode::ReadWrite => self.entry.writer.set(false),
            OpenMode::Read => self.entry.readers.set(self.entry.readers.get() - 1),
        }
    }
}

impl ContainerHandle for MemoryHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn version(&self) -> BagResult<String> {
        Ok(self.entry.file.borrow().version.clone())
    }

    fn set_version(&mut self, version: &str) -> BagResult<()> {
        self.ensure_writable()?;
        self.entry.file.borrow_mut().version = version.to_string();
        Ok(())
    }

    fn geometry(&self) -> BagResult<BaseGeometry> {
        Ok(self.entry.file.borrow().geometry.clone())
    }

    fn read_band(&self, kind: BandKind) -> BagResult<BandGrid> {
        let file = self.entry.file.borrow();
        Ok(match kind {
            BandKind::Elevation => file.elevation.clone(),
            BandKind::Uncertainty => file.uncertainty.clone(),
        })
    }

    fn write_band(&mut self, kind: BandKind, data: &BandGrid) -> BagResult<()> {
        self.ensure_writable()?;
        let mut file = self.entry.file.borrow_mut();
        let expected = (file.geometry.rows, file.geometry.cols);
        if data.dim() != expected {
            return Err(BagError::ContainerWrite(format!(
                "{} band shape {:?} does not match container shape {:?}",
                kind,
                data.dim(),
                expected
            )));
        }
        match kind {
            BandKind::Elevation => file.elevation = data.clone(),
            BandKind::Uncertainty => file.uncertainty = data.clone(),
        }
        Ok(())
    }

    fn metadata_document(&self) -> BagResult<Vec<u8>> {
        Ok(self.entry.file.borrow().metadata_doc.clone())
    }

    fn replace_metadata_document(&mut self, doc: &[u8]) -> BagResult<()> {
        self.ensure_writable()?;
        self.entry.file.borrow_mut().metadata_doc = doc.to_vec();
        Ok(())
    }

    fn create_georef_layer(
        &mut self,
        name: &str,
        profile: &str,
        chunk_size: usize,
        compression_level: u8,
    ) -> BagResult<()> {
        self.ensure_writable()?;
        let mut file = self.entry.file.borrow_mut();
        if file.georef.is_some() {
            return Err(BagError::ContainerWrite(format!(
                "'{}' already has a georeferenced metadata layer",
                self.path.display()
            )));
        }
        let shape = (file.geometry.rows, file.geometry.cols);
        file.georef = Some(GeorefLayer {
            name: name.to_string(),
            profile: profile.to_string(),
            chunk_size,
            compression_level,
            keys: Array2::zeros(shape),
            records: Vec::new(),
        });
        Ok(())
    }

    fn rename_georef_layer(&mut self, name: &str) -> BagResult<()> {
        let name = name.to_string();
        self.with_georef_mut(|layer| {
            layer.name = name;
            Ok(())
        })
    }

    fn georef_name(&self) -> BagResult<Option<String>> {
        Ok(self
            .entry
            .file
            .borrow()
            .georef
            .as_ref()
            .map(|layer| layer.name.clone()))
    }

    fn write_value_table(&mut self, records: &[ProvenanceRecord]) -> BagResult<()> {
        let records = records.to_vec();
        self.with_georef_mut(|layer| {
            layer.records = records;
            Ok(())
        })
    }

    fn read_value_table(&self) -> BagResult<Vec<ProvenanceRecord>> {
        let file = self.entry.file.borrow();
        match file.georef.as_ref() {
            Some(layer) => Ok(layer.records.clone()),
            None => Err(BagError::Container(format!(
                "'{}' has no georeferenced metadata layer",
                self.path.display()
            ))),
        }
    }

    fn write_keys(&mut self, keys: &KeyGrid) -> BagResult<()> {
        let shape = keys.dim();
        let expected = {
            let file = self.entry.file.borrow();
            (file.geometry.rows, file.geometry.cols)
        };
        if shape != expected {
            return Err(BagError::ContainerWrite(format!(
                "keys shape {:?} does not match container shape {:?}",
                shape, expected
            )));
        }
        let keys = keys.clone();
        self.with_georef_mut(|layer| {
            layer.keys = keys;
            Ok(())
        })
    }

    fn read_keys(&self) -> BagResult<KeyGrid> {
        let file = self.entry.file.borrow();
        match file.georef.as_ref() {
            Some(layer) => Ok(layer.keys.clone()),
            None => Err(BagError::Container(format!(
                "'{}' has no georeferenced metadata layer",
                self.path.display()
            ))),
        }
    }
}
