//! Append-only provenance record table.
//!
//! Records are addressed by their 0-based insertion position; indices are
//! never reused or renumbered within a job, because key-layer cells written
//! against an index are positional, not content-addressed. Keys reserve 0
//! for "unassigned", so a stored key is always table index + 1.

use crate::types::{BagError, BagResult, ProvenanceRecord, KEY_UNASSIGNED};

/// Key-layer value referencing the record at `index`.
pub fn key_for(index: u16) -> u16 {
    index + 1
}

/// Strongly-typed value table for one conversion job.
#[derive(Debug, Default)]
pub struct ValueTable {
    records: Vec<ProvenanceRecord>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, returning its stable 0-based index.
    ///
    /// The only failure mode is exhausting the u16 key space: the largest
    /// usable index is `u16::MAX - 1` so that `key_for` never wraps.
    pub fn add_record(&mut self, record: ProvenanceRecord) -> BagResult<u16> {
        let index = self.records.len();
        if index >= usize::from(u16::MAX) {
            return Err(BagError::ContainerWrite(format!(
                "value table is full ({index} records)"
            )));
        }
        self.records.push(record);
        Ok(index as u16)
    }

    /// Records in insertion order, the order they must be serialized in.
    pub fn records(&self) -> &[ProvenanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolve a key-layer value back to its record. Key 0 is the
    /// unassigned sentinel and resolves to nothing.
    pub fn resolve(&self, key: u16) -> Option<&ProvenanceRecord> {
        if key == KEY_UNASSIGNED {
            return None;
        }
        self.records.get(usize::from(key) - 1)
    }
}
