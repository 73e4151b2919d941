use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::sstable::block::reader::Block;
use crate::sstable::footer::{BlockHandle, Footer, IndexEntry, SSTableMeta, strip_checksum};
use crate::sstable::iterator::SSTableIterator;
use crate::types::ValueType;

/// A table file opened for point lookups and scans.
///
/// Opening reads the footer, then the index, meta and filter blocks into
/// memory. Data blocks are read on demand.
///
/// Tables are shared as `Arc<SSTable>` between the live version and any
/// in-flight scans. Once compaction replaces a table it is marked obsolete
/// and the file is removed when the last reference goes away.
pub struct SSTable {
    path: PathBuf,
    /// Data blocks are read through this handle on demand.
    file: Mutex<File>,
    index: Vec<IndexEntry>,
    meta: SSTableMeta,
    filter: BloomFilter,
    obsolete: AtomicBool,
}

impl SSTable {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: file too short to contain footer",
                path.display()
            )));
        }

        let trailer = BlockHandle::new(file_size - Footer::SIZE as u64, Footer::SIZE as u64);
        let footer = Footer::decode(&read_at(&mut file, trailer)?)?;
        footer.validate(file_size)?;

        let index_buf = read_at(&mut file, footer.index)?;
        let index = IndexEntry::decode_all(strip_checksum(&index_buf, "index")?)?;
        // Data blocks end where the meta block starts.
        if let Some(i) = index
            .iter()
            .position(|e| e.handle.end().is_none_or(|end| end > footer.meta.offset))
        {
            return Err(Error::Corruption(format!(
                "{}: index entry {i} points past the data blocks",
                path.display()
            )));
        }

        let meta_buf = read_at(&mut file, footer.meta)?;
        let meta = SSTableMeta::decode(strip_checksum(&meta_buf, "meta")?, file_size)?;
        let filter_buf = read_at(&mut file, footer.filter)?;
        let filter = BloomFilter::decode(strip_checksum(&filter_buf, "filter")?)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            meta,
            filter,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Point lookup, tombstones included.
    ///
    /// Keys outside the table's span or rejected by the filter cost no I/O.
    /// Otherwise exactly one data block is read.
    pub fn get_entry(&self, key: &[u8]) -> Result<Option<(ValueType, Vec<u8>)>> {
        if self.index.is_empty()
            || key < self.meta.min_key.as_slice()
            || key > self.meta.max_key.as_slice()
            || !self.filter.may_contain(key)
        {
            return Ok(None);
        }

        let block_idx = self.block_for(key);
        if block_idx >= self.index.len() {
            return Ok(None);
        }

        let block = self.read_block(block_idx)?;
        Ok(block.get_entry(key).map(|(t, v)| (t, v.to_vec())))
    }

    /// Point lookup: the live value for `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(match self.get_entry(key)? {
            Some((ValueType::Put, v)) => Some(v),
            _ => None,
        })
    }

    /// Index of the first block whose last key is >= `key`.
    pub(crate) fn block_for(&self, key: &[u8]) -> usize {
        self.index.partition_point(|entry| entry.last_key.as_slice() < key)
    }

    /// Number of data blocks.
    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    /// Read and verify one data block.
    pub fn read_block(&self, idx: usize) -> Result<Block> {
        let entry = self
            .index
            .get(idx)
            .ok_or_else(|| Error::Corruption(format!("block {idx} out of range")))?;
        let data = {
            let mut file = self.file.lock();
            read_at(&mut file, entry.handle)?
        };
        Block::decode(data).map_err(|e| match e {
            Error::Corruption(msg) => {
                Error::Corruption(format!("{} block {idx}: {msg}", self.path.display()))
            }
            other => other,
        })
    }

    /// Create an iterator positioned at the first entry.
    pub fn iter(self: &Arc<Self>) -> Result<SSTableIterator> {
        SSTableIterator::new(Arc::clone(self))
    }

    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schedule the file for removal once the last reference is dropped.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::Acquire) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove obsolete table");
            }
        }
    }
}

fn read_at(file: &mut File, handle: BlockHandle) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; handle.size as usize];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}
