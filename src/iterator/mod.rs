pub mod merge;

use std::ops::Bound;

use crate::error::Result;
use crate::types::ValueType;

/// Cursor over a sorted source: skip list, memtable snapshot, block, table,
/// or a merge of several of these.
///
/// Accessors may only be called while `is_valid`. `next` and `seek` fail
/// when the source can no longer be trusted (I/O error, bad checksum); a
/// scan treats that as fatal.
pub trait StorageIterator {
    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    /// Put or tombstone.
    fn value_type(&self) -> ValueType;

    fn is_valid(&self) -> bool;

    fn next(&mut self) -> Result<()>;

    /// Move to the first entry with key >= `key`.
    fn seek(&mut self, key: &[u8]) -> Result<()>;
}

/// Whether `key` is still inside an upper bound.
pub fn within_upper(key: &[u8], upper: &Bound<Vec<u8>>) -> bool {
    match upper {
        Bound::Included(last) => key <= last.as_slice(),
        Bound::Excluded(last) => key < last.as_slice(),
        Bound::Unbounded => true,
    }
}
