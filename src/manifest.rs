use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::{MANIFEST_FILE, sync_dir};
use crate::sstable::SSTableMeta;
use crate::types::{read_u32, read_u64};

const MANIFEST_MAGIC: u32 = 0x4D41_4E49; // "MANI"
const MANIFEST_VERSION: u32 = 1;

/// Durable description of the engine's live state.
///
/// Rewritten as a whole after every flush and compaction:
///
/// ```text
/// [magic(4B)][version(4B)][next_file_id(8B)][log_number(8B)][table_count(4B)]
/// table*: [level(4B)][id(8B)][file_size(8B)][entry_count(8B)]
///         [min_len(4B)][min_key][max_len(4B)][max_key]
/// [crc32 of everything above(4B)]
/// ```
///
/// Level 0 tables are listed newest first; level 1 tables in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Next id handed out to a new SSTable.
    pub next_file_id: u64,
    /// Oldest WAL segment still holding data not yet in an SSTable.
    pub log_number: u64,
    pub tables: Vec<SSTableMeta>,
}

impl Manifest {
    /// Load the manifest from `dir`. `None` for a fresh directory.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        Self::decode(&data).map(Some)
    }

    /// Atomically replace the manifest in `dir`: write a temp file, fsync it,
    /// rename over the old one, fsync the directory.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&self.encode())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        sync_dir(dir)?;
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MANIFEST_MAGIC.to_le_bytes());
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.next_file_id.to_le_bytes());
        buf.extend_from_slice(&self.log_number.to_le_bytes());
        buf.extend_from_slice(&(self.tables.len() as u32).to_le_bytes());
        for t in &self.tables {
            buf.extend_from_slice(&t.level.to_le_bytes());
            buf.extend_from_slice(&t.id.to_le_bytes());
            buf.extend_from_slice(&t.file_size.to_le_bytes());
            buf.extend_from_slice(&t.entry_count.to_le_bytes());
            buf.extend_from_slice(&(t.min_key.len() as u32).to_le_bytes());
            buf.extend_from_slice(&t.min_key);
            buf.extend_from_slice(&(t.max_key.len() as u32).to_le_bytes());
            buf.extend_from_slice(&t.max_key);
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 32 {
            return Err(Error::Corruption("manifest too short".into()));
        }
        let body = &data[..data.len() - 4];
        if crc32fast::hash(body) != read_u32(data, body.len())? {
            return Err(Error::Corruption("manifest CRC mismatch".into()));
        }
        if read_u32(body, 0)? != MANIFEST_MAGIC {
            return Err(Error::Corruption("bad manifest magic".into()));
        }
        let version = read_u32(body, 4)?;
        if version != MANIFEST_VERSION {
            return Err(Error::Corruption(format!("unsupported manifest version {version}")));
        }

        let next_file_id = read_u64(body, 8)?;
        let log_number = read_u64(body, 16)?;
        let count = read_u32(body, 24)? as usize;
        let mut offset = 28;

        let mut tables = Vec::new();
        for _ in 0..count {
            let level = read_u32(body, offset)?;
            let id = read_u64(body, offset + 4)?;
            let file_size = read_u64(body, offset + 12)?;
            let entry_count = read_u64(body, offset + 20)?;
            offset += 28;
            let min_key = read_key(body, &mut offset)?;
            let max_key = read_key(body, &mut offset)?;
            tables.push(SSTableMeta {
                id,
                level,
                min_key,
                max_key,
                file_size,
                entry_count,
            });
        }
        if offset != body.len() {
            return Err(Error::Corruption("trailing bytes in manifest".into()));
        }

        Ok(Manifest {
            next_file_id,
            log_number,
            tables,
        })
    }
}

fn read_key(data: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
    let len = read_u32(data, *offset)? as usize;
    *offset += 4;
    let key = data
        .get(*offset..*offset + len)
        .ok_or_else(|| Error::Corruption("manifest key out of range".into()))?
        .to_vec();
    *offset += len;
    Ok(key)
}
