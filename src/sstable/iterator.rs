use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::reader::BlockIterator;
use crate::sstable::reader::SSTable;
use crate::types::ValueType;

/// Two-level cursor over an SSTable: index entry → data block → entry.
///
/// Holds its own `Arc` to the table, so the file stays readable even if a
/// compaction retires the table mid-scan. Blocks are loaded one at a time;
/// a block that fails its checksum surfaces as an error from `next`/`seek`.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    block_idx: usize,
    block_iter: Option<BlockIterator>,
}

impl SSTableIterator {
    /// Create an iterator positioned at the first entry of `table`.
    pub fn new(table: Arc<SSTable>) -> Result<Self> {
        let mut iter = SSTableIterator {
            table,
            block_idx: 0,
            block_iter: None,
        };
        iter.load_block(0)?;
        Ok(iter)
    }

    /// Create an iterator positioned at the first entry >= `key`.
    pub fn new_at(table: Arc<SSTable>, key: &[u8]) -> Result<Self> {
        let mut iter = SSTableIterator {
            table,
            block_idx: 0,
            block_iter: None,
        };
        iter.seek(key)?;
        Ok(iter)
    }

    /// Load block `idx` (or mark exhausted) and skip forward past any
    /// empty blocks.
    fn load_block(&mut self, idx: usize) -> Result<()> {
        self.block_idx = idx;
        self.block_iter = None;
        while self.block_idx < self.table.num_blocks() {
            let iter = self.table.read_block(self.block_idx)?.iter();
            if iter.is_valid() {
                self.block_iter = Some(iter);
                return Ok(());
            }
            self.block_idx += 1;
        }
        Ok(())
    }

    fn current(&self) -> &BlockIterator {
        self.block_iter.as_ref().expect("iterator is not valid")
    }
}

impl StorageIterator for SSTableIterator {
    fn key(&self) -> &[u8] {
        self.current().key()
    }

    fn value(&self) -> &[u8] {
        self.current().value()
    }

    fn value_type(&self) -> ValueType {
        self.current().value_type()
    }

    fn is_valid(&self) -> bool {
        self.block_iter.as_ref().is_some_and(|it| it.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        let Some(iter) = self.block_iter.as_mut() else {
            return Ok(());
        };
        iter.next()?;
        if !iter.is_valid() {
            self.load_block(self.block_idx + 1)?;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let idx = self.table.block_for(key);
        self.load_block(idx)?;
        if let Some(iter) = self.block_iter.as_mut() {
            iter.seek(key)?;
            if !iter.is_valid() {
                self.load_block(self.block_idx + 1)?;
            }
        }
        Ok(())
    }
}
