use crate::sstable::block::{ENTRY_HEADER_SIZE, TRAILER_SIZE};
use crate::types::ValueType;

/// Serializes one data block of a table.
///
/// ```text
/// entry*    [type u8][key_len u32][val_len u32][key][value]
/// starts    [u32; n]   offset of each entry, for binary search
/// trailer   [n u32][crc32 u32]   crc covers everything before it
/// ```
///
/// Lengths are four bytes wide: a single log entry can exceed 64 KiB.
pub struct BlockBuilder {
    body: Vec<u8>,
    starts: Vec<u32>,
    target: usize,
}

impl BlockBuilder {
    /// `target` is a soft limit on the built size.
    pub fn new(target: usize) -> Self {
        BlockBuilder {
            body: Vec::with_capacity(target),
            starts: Vec::new(),
            target,
        }
    }

    /// Append an entry if it keeps the block within its target. An empty
    /// block takes any entry, so oversized values still get a block of their
    /// own. Keys must arrive in ascending order.
    pub fn add(&mut self, key: &[u8], value_type: ValueType, value: &[u8]) -> bool {
        // Entry bytes plus its slot in `starts`.
        let grows_by = ENTRY_HEADER_SIZE + key.len() + value.len() + 4;
        if !self.is_empty() && self.estimated_size() + grows_by > self.target {
            return false;
        }

        self.starts.push(self.body.len() as u32);
        self.body.push(value_type as u8);
        for len in [key.len(), value.len()] {
            self.body.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.body.extend_from_slice(key);
        self.body.extend_from_slice(value);
        true
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = self.body;
        out.reserve(self.starts.len() * 4 + TRAILER_SIZE);
        out.extend(self.starts.iter().flat_map(|s| s.to_le_bytes()));
        out.extend_from_slice(&(self.starts.len() as u32).to_le_bytes());
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Size `build` would return now.
    pub fn estimated_size(&self) -> usize {
        self.body.len() + self.starts.len() * 4 + TRAILER_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}
