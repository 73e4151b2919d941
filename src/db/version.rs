use std::sync::Arc;

use crate::sstable::{SSTable, SSTableMeta};
use crate::types::ValueType;
use crate::error::Result;

/// The set of live SSTables at one point in time.
///
/// - Level 0: flushed memtables, newest first. Key ranges may overlap.
/// - Level 1: compaction output, sorted by key, never overlapping.
///
/// Cloning only bumps reference counts, which is how scans pin the tables
/// they read while compaction installs a new version.
#[derive(Clone, Default)]
pub struct Version {
    pub l0: Vec<Arc<SSTable>>,
    pub l1: Vec<Arc<SSTable>>,
}

impl Version {
    /// Point lookup across both levels. The first hit wins, tombstones
    /// included, so a delete in a newer table hides older values.
    pub fn get_entry(&self, key: &[u8]) -> Result<Option<(ValueType, Vec<u8>)>> {
        for table in &self.l0 {
            if let Some(entry) = table.get_entry(key)? {
                return Ok(Some(entry));
            }
        }
        let idx = self.l1.partition_point(|t| t.meta().max_key.as_slice() < key);
        match self.l1.get(idx) {
            Some(table) => table.get_entry(key),
            None => Ok(None),
        }
    }

    /// Level 1 tables intersecting `[first, last]`, in key order.
    pub fn l1_overlapping(&self, first: &[u8], last: &[u8]) -> Vec<Arc<SSTable>> {
        self.l1
            .iter()
            .filter(|t| t.meta().overlaps(first, last))
            .cloned()
            .collect()
    }

    /// Manifest view: level 0 newest first, then level 1 in key order.
    pub fn metas(&self) -> Vec<SSTableMeta> {
        self.l0
            .iter()
            .chain(self.l1.iter())
            .map(|t| t.meta().clone())
            .collect()
    }

    pub fn num_tables(&self) -> usize {
        self.l0.len() + self.l1.len()
    }
}
