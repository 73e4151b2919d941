use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::bloom::builder::BloomFilterBuilder;
use crate::error::Result;
use crate::sstable::block::builder::BlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer, IndexEntry, SSTableMeta, with_checksum};
use crate::types::ValueType;

pub const DEFAULT_BLOOM_FPR: f64 = 0.01;

/// Streams sorted entries into a new table file.
///
/// Flushes feed it a memtable in key order (tombstones included) and
/// compaction feeds it merged output. Data blocks go to disk as they fill;
/// [`finish`](Self::finish) appends the meta, filter and index blocks and the
/// footer, then fsyncs.
pub struct SSTableBuilder {
    out: BufWriter<File>,
    /// Bytes written to `out` so far.
    written: u64,
    block: BlockBuilder,
    block_size: usize,
    /// Largest key in `block`.
    block_last_key: Vec<u8>,
    index: Vec<IndexEntry>,
    bloom: BloomFilterBuilder,
    meta: SSTableMeta,
}

impl SSTableBuilder {
    pub fn new(path: &Path, sst_id: u64, block_size: usize) -> Result<Self> {
        Ok(SSTableBuilder {
            out: BufWriter::new(File::create(path)?),
            written: 0,
            block: BlockBuilder::new(block_size),
            block_size,
            block_last_key: Vec::new(),
            index: Vec::new(),
            bloom: BloomFilterBuilder::new(1024, DEFAULT_BLOOM_FPR),
            meta: SSTableMeta {
                id: sst_id,
                level: 0,
                min_key: Vec::new(),
                max_key: Vec::new(),
                file_size: 0,
                entry_count: 0,
            },
        })
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.meta.level = level;
        self
    }

    pub fn with_bloom_fpr(mut self, fpr: f64) -> Self {
        self.bloom = BloomFilterBuilder::new(1024, fpr);
        self
    }

    /// Append one entry. Keys must arrive in strictly ascending order.
    pub fn add(&mut self, key: &[u8], value_type: ValueType, value: &[u8]) -> Result<()> {
        if self.meta.entry_count == 0 {
            self.meta.min_key = key.to_vec();
        }
        self.meta.entry_count += 1;
        self.bloom.add_key(key);

        if !self.block.add(key, value_type, value) {
            self.seal_block()?;
            // An empty block takes any entry.
            self.block.add(key, value_type, value);
        }
        self.block_last_key.clear();
        self.block_last_key.extend_from_slice(key);
        Ok(())
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.add(key, ValueType::Put, value)
    }

    /// Bytes on disk plus the open block.
    pub fn estimated_size(&self) -> u64 {
        self.written + self.block.estimated_size() as u64
    }

    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<BlockHandle> {
        self.out.write_all(bytes)?;
        let handle = BlockHandle::new(self.written, bytes.len() as u64);
        self.written += handle.size;
        Ok(handle)
    }

    /// Write the open block and index it under its last key.
    fn seal_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let full = std::mem::replace(&mut self.block, BlockBuilder::new(self.block_size));
        let handle = self.write_raw(&full.build())?;
        self.index.push(IndexEntry {
            last_key: std::mem::take(&mut self.block_last_key),
            handle,
        });
        Ok(())
    }

    pub fn finish(mut self) -> Result<SSTableMeta> {
        self.seal_block()?;
        self.meta.max_key = self.index.last().map(|e| e.last_key.clone()).unwrap_or_default();

        let meta = self.write_raw(&with_checksum(self.meta.encode()))?;
        let filter = self.write_raw(&with_checksum(self.bloom.build().encode()))?;
        let mut index_block = Vec::new();
        for entry in &self.index {
            entry.encode_into(&mut index_block);
        }
        let index = self.write_raw(&with_checksum(index_block))?;
        self.write_raw(&Footer::new(index, meta, filter).encode())?;

        self.out.flush()?;
        self.out.get_ref().sync_all()?;

        self.meta.file_size = self.written;
        Ok(self.meta)
    }
}
