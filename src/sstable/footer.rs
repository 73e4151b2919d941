//! Table trailer structures: block handles, the index, the meta block and
//! the fixed-size footer that locates them.
//!
//! ```text
//! [data block]...[meta][filter][index][footer]
//!
//! footer = [index handle][meta handle][filter handle][magic u64]
//! handle = [offset u64][size u64]
//! ```
//!
//! The meta, filter and index blocks each end in a crc32 of their contents;
//! their handles include those four bytes.

use crate::error::{Error, Result};
use crate::types::{read_u32, read_u64};

pub const SSTABLE_MAGIC: u64 = 0x4C4F_4744_425F_5354; // "LOGDB_ST"

/// Append a crc32 of `block` to it.
pub fn with_checksum(mut block: Vec<u8>) -> Vec<u8> {
    let crc = crc32fast::hash(&block);
    block.extend_from_slice(&crc.to_le_bytes());
    block
}

/// Verify and strip the crc32 written by [`with_checksum`].
pub fn strip_checksum<'a>(data: &'a [u8], what: &str) -> Result<&'a [u8]> {
    let Some(body_len) = data.len().checked_sub(4) else {
        return Err(Error::Corruption(format!("{what} block too short")));
    };
    let (body, crc) = data.split_at(body_len);
    if crc32fast::hash(body) != read_u32(crc, 0)? {
        return Err(Error::Corruption(format!("{what} block checksum mismatch")));
    }
    Ok(body)
}

/// Where a block lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub const ENCODED_LEN: usize = 16;

    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
    }

    fn decode_at(data: &[u8], at: usize) -> Result<Self> {
        Ok(BlockHandle {
            offset: read_u64(data, at)?,
            size: read_u64(data, at + 8)?,
        })
    }
}

/// Key span and shape of one table. Written into the table's meta block and
/// listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    pub id: u64,
    /// 0 for flushed memtables, 1 for compaction output.
    pub level: u32,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    /// Not stored in the meta block; taken from the file itself.
    pub file_size: u64,
    /// Puts and tombstones alike.
    pub entry_count: u64,
}

impl SSTableMeta {
    /// `[id u64][level u32][min_len u32][min][max_len u32][max][entries u64]`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28 + self.min_key.len() + self.max_key.len());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.level.to_le_bytes());
        for key in [&self.min_key, &self.max_key] {
            buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buf.extend_from_slice(key);
        }
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8], file_size: u64) -> Result<Self> {
        let mut cursor = MetaCursor { data, pos: 0 };
        let id = cursor.u64("id")?;
        let level = cursor.u32("level")?;
        let min_key = cursor.key("min_key")?;
        let max_key = cursor.key("max_key")?;
        let entry_count = cursor.u64("entry_count")?;
        Ok(SSTableMeta {
            id,
            level,
            min_key,
            max_key,
            file_size,
            entry_count,
        })
    }

    /// Whether the key span intersects `[first, last]`.
    pub fn overlaps(&self, first: &[u8], last: &[u8]) -> bool {
        self.min_key.as_slice() <= last && self.max_key.as_slice() >= first
    }
}

struct MetaCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl MetaCursor<'_> {
    fn short(field: &str) -> Error {
        Error::Corruption(format!("meta block too short for {field}"))
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        let v = read_u32(self.data, self.pos).map_err(|_| Self::short(field))?;
        self.pos += 4;
        Ok(v)
    }

    fn u64(&mut self, field: &str) -> Result<u64> {
        let v = read_u64(self.data, self.pos).map_err(|_| Self::short(field))?;
        self.pos += 8;
        Ok(v)
    }

    fn key(&mut self, field: &str) -> Result<Vec<u8>> {
        let len = self.u32(field)? as usize;
        let key = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| Self::short(field))?
            .to_vec();
        self.pos += len;
        Ok(key)
    }
}

/// Index record for one data block: its largest key and where it lives.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub last_key: Vec<u8>,
    pub handle: BlockHandle,
}

impl IndexEntry {
    /// `[key_len u32][key][handle]`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.last_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.last_key);
        self.handle.encode_into(buf);
    }

    /// Parse a whole index block.
    pub fn decode_all(mut data: &[u8]) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        while !data.is_empty() {
            let key_len = read_u32(data, 0)
                .map_err(|_| Error::Corruption("index entry too short".into()))?
                as usize;
            let used = 4 + key_len + BlockHandle::ENCODED_LEN;
            if data.len() < used {
                return Err(Error::Corruption("index entry truncated".into()));
            }
            entries.push(IndexEntry {
                last_key: data[4..4 + key_len].to_vec(),
                handle: BlockHandle::decode_at(data, 4 + key_len)?,
            });
            data = &data[used..];
        }
        Ok(entries)
    }
}

/// Fixed-size trailer locating the index, meta and filter blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub index: BlockHandle,
    pub meta: BlockHandle,
    pub filter: BlockHandle,
    pub magic: u64,
}

impl Footer {
    pub const SIZE: usize = 3 * BlockHandle::ENCODED_LEN + 8;

    pub fn new(index: BlockHandle, meta: BlockHandle, filter: BlockHandle) -> Self {
        Footer {
            index,
            meta,
            filter,
            magic: SSTABLE_MAGIC,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        for handle in [&self.index, &self.meta, &self.filter] {
            handle.encode_into(&mut buf);
        }
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic = read_u64(data, Self::SIZE - 8)?;
        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {SSTABLE_MAGIC:#x}, got {magic:#x}"
            )));
        }
        Ok(Footer {
            index: BlockHandle::decode_at(data, 0)?,
            meta: BlockHandle::decode_at(data, 16)?,
            filter: BlockHandle::decode_at(data, 32)?,
            magic,
        })
    }

    /// Every handle must end before the footer starts.
    pub fn validate(&self, file_size: u64) -> Result<()> {
        let body_end = file_size.saturating_sub(Self::SIZE as u64);
        for (name, handle) in [("index", self.index), ("meta", self.meta), ("filter", self.filter)] {
            if handle.end().is_none_or(|end| end > body_end) {
                return Err(Error::Corruption(format!("{name} block out of range")));
            }
        }
        Ok(())
    }
}
