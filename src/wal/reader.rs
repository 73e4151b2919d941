use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::wal::record::WALRecord;

/// A whole WAL segment loaded for replay.
///
/// Records are appended and synced in order, so the first record that fails
/// to decode marks where a crash cut the segment short. Everything before it
/// is intact; everything from it on is a torn tail and is never applied.
pub struct WALReader {
    data: Vec<u8>,
}

impl WALReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(WALReader {
            data: fs::read(path)?,
        })
    }

    pub fn records(&self) -> Records<'_> {
        Records { rest: &self.data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Intact records of a segment, oldest first.
pub struct Records<'a> {
    rest: &'a [u8],
}

impl Records<'_> {
    /// Bytes left undecoded. Non-zero once exhausted means a torn tail.
    pub fn torn_bytes(&self) -> usize {
        self.rest.len()
    }
}

impl Iterator for Records<'_> {
    type Item = WALRecord;

    fn next(&mut self) -> Option<WALRecord> {
        if self.rest.is_empty() {
            return None;
        }
        let record = WALRecord::decode(self.rest).ok()?;
        self.rest = &self.rest[record.encoded_size()..];
        Some(record)
    }
}
