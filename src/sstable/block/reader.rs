use std::sync::Arc;

use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::block::{ENTRY_HEADER_SIZE, TRAILER_SIZE};
use crate::types::{ValueType, read_u32};

/// Location of one entry inside the block data.
#[derive(Debug, Clone, Copy)]
struct EntryPos {
    value_type: ValueType,
    key_start: usize,
    key_end: usize,
    value_end: usize,
}

/// A decoded, checksum-verified data block.
///
/// Every entry is bounds-checked once in `decode`, so lookups and iteration
/// afterwards are infallible. Cloning is cheap (shared buffers).
#[derive(Debug, Clone)]
pub struct Block {
    data: Arc<Vec<u8>>,
    entries: Arc<Vec<EntryPos>>,
}

impl Block {
    /// Decode a block produced by `BlockBuilder::build`.
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        if data.len() < TRAILER_SIZE {
            return Err(Error::Corruption("block too short".into()));
        }
        let crc_offset = data.len() - 4;
        let stored_crc = read_u32(&data, crc_offset)?;
        if crc32fast::hash(&data[..crc_offset]) != stored_crc {
            return Err(Error::Corruption("block CRC mismatch".into()));
        }

        let count_offset = crc_offset - 4;
        let count = read_u32(&data, count_offset)? as usize;
        let offsets_start = count
            .checked_mul(4)
            .and_then(|n| count_offset.checked_sub(n))
            .ok_or_else(|| Error::Corruption("block offset array out of range".into()))?;

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let off = read_u32(&data, offsets_start + i * 4)? as usize;
            if off + ENTRY_HEADER_SIZE > offsets_start {
                return Err(Error::Corruption(format!("block entry {i} header out of range")));
            }
            let value_type = ValueType::from_u8(data[off])?;
            let key_len = read_u32(&data, off + 1)? as usize;
            let val_len = read_u32(&data, off + 5)? as usize;
            let key_start = off + ENTRY_HEADER_SIZE;
            let key_end = key_start + key_len;
            let value_end = key_end + val_len;
            if value_end > offsets_start {
                return Err(Error::Corruption(format!("block entry {i} out of range")));
            }
            entries.push(EntryPos {
                value_type,
                key_start,
                key_end,
                value_end,
            });
        }

        Ok(Block {
            data: Arc::new(data),
            entries: Arc::new(entries),
        })
    }

    /// Number of entries in the block.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_at(&self, idx: usize) -> &[u8] {
        let e = self.entries[idx];
        &self.data[e.key_start..e.key_end]
    }

    fn value_at(&self, idx: usize) -> &[u8] {
        let e = self.entries[idx];
        &self.data[e.key_end..e.value_end]
    }

    /// Index of the first entry with key >= target (len() if none).
    fn lower_bound(&self, key: &[u8]) -> usize {
        let (mut lo, mut hi) = (0, self.entries.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Binary search for `key`, tombstones included.
    pub fn get_entry(&self, key: &[u8]) -> Option<(ValueType, &[u8])> {
        let idx = self.lower_bound(key);
        (idx < self.len() && self.key_at(idx) == key)
            .then(|| (self.entries[idx].value_type, self.value_at(idx)))
    }

    /// Binary search for `key`. Returns None if absent or deleted.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        match self.get_entry(key) {
            Some((ValueType::Put, v)) => Some(v),
            _ => None,
        }
    }

    /// First key in the block.
    pub fn first_key(&self) -> Option<&[u8]> {
        (!self.is_empty()).then(|| self.key_at(0))
    }

    /// Iterator positioned at the first entry.
    pub fn iter(&self) -> BlockIterator {
        BlockIterator {
            block: self.clone(),
            idx: 0,
        }
    }
}

/// Cursor over one block's entries.
pub struct BlockIterator {
    block: Block,
    idx: usize,
}

impl StorageIterator for BlockIterator {
    fn key(&self) -> &[u8] {
        self.block.key_at(self.idx)
    }

    fn value(&self) -> &[u8] {
        self.block.value_at(self.idx)
    }

    fn value_type(&self) -> ValueType {
        self.block.entries[self.idx].value_type
    }

    fn is_valid(&self) -> bool {
        self.idx < self.block.len()
    }

    fn next(&mut self) -> Result<()> {
        if self.is_valid() {
            self.idx += 1;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.idx = self.block.lower_bound(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::block::builder::BlockBuilder;

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut builder = BlockBuilder::new(4096);
        builder.add(b"k", ValueType::Put, b"v");
        let mut data = builder.build();
        data[0] ^= 0x40;
        assert!(matches!(Block::decode(data), Err(Error::Corruption(_))));
    }

    #[test]
    fn tombstone_entries_are_kept() {
        let mut builder = BlockBuilder::new(4096);
        builder.add(b"a", ValueType::Put, b"1");
        builder.add(b"b", ValueType::Delete, b"");
        let block = Block::decode(builder.build()).unwrap();
        assert_eq!(block.get(b"b"), None);
        assert_eq!(block.get_entry(b"b"), Some((ValueType::Delete, b"".as_slice())));
    }
}
