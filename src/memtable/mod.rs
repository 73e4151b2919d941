pub mod skiplist;

use std::ops::Bound;

use skiplist::{SkipList, SkipListIterator};

use crate::error::Result;
use crate::iterator::{StorageIterator, within_upper};
use crate::types::{Key, Value, ValueType};

/// Committed writes not yet in a table.
///
/// A batch is applied here once its WAL record is written. Deletes are
/// stored as tombstones because older values may still sit in tables.
/// Once [`is_full`](Self::is_full) the engine flushes it to level 0.
pub struct MemTable {
    entries: SkipList,
    flush_at: usize,
}

impl MemTable {
    pub fn new(flush_at: usize) -> Self {
        MemTable {
            entries: SkipList::new(),
            flush_at,
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    /// Live value only; a tombstone reads as `None`.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key)
    }

    /// Look up a key, distinguishing "deleted here" from "not here".
    pub fn get_entry(&self, key: &[u8]) -> Option<(ValueType, &[u8])> {
        self.entries.get_entry(key)
    }

    /// Mark a key as deleted by writing a tombstone.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.entries.insert_tombstone(key);
    }

    pub fn iter(&self) -> SkipListIterator<'_> {
        self.entries.iter()
    }

    /// Copy out the entries in `[lower, upper)` (or `[lower, upper]`) so a
    /// scan can proceed without holding the engine lock.
    pub fn snapshot_range(&self, lower: &[u8], upper: &Bound<Vec<u8>>) -> Result<MemTableIterator> {
        let mut entries = Vec::new();
        let mut iter = self.entries.iter();
        iter.seek(lower)?;
        while iter.is_valid() && within_upper(iter.key(), upper) {
            entries.push((iter.key().to_vec(), iter.value_type(), iter.value().to_vec()));
            iter.next()?;
        }
        Ok(MemTableIterator { entries, pos: 0 })
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate bytes held.
    pub fn size(&self) -> usize {
        self.entries.size_bytes()
    }

    /// Whether the memtable has reached its flush threshold.
    pub fn is_full(&self) -> bool {
        self.entries.size_bytes() >= self.flush_at
    }
}

/// Owned, point-in-time copy of part of a memtable.
pub struct MemTableIterator {
    entries: Vec<(Key, ValueType, Value)>,
    pos: usize,
}

impl StorageIterator for MemTableIterator {
    fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos].2
    }

    fn value_type(&self) -> ValueType {
        self.entries[self.pos].1
    }

    fn is_valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn next(&mut self) -> Result<()> {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.pos = self.entries.partition_point(|(k, _, _)| k.as_slice() < key);
        Ok(())
    }
}
