use crate::error::{Error, Result};

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Distinguishes puts from deletes everywhere an entry is stored.
///
/// A Delete writes a tombstone: the key isn't removed, it's marked as
/// deleted so older versions in SSTables stay shadowed. Tombstones are a
/// separate kind rather than an empty value, since an empty value is a
/// perfectly good value for the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

impl ValueType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(ValueType::Put),
            0x02 => Ok(ValueType::Delete),
            _ => Err(Error::Corruption(format!("invalid value type: {byte}"))),
        }
    }

    pub fn is_tombstone(self) -> bool {
        self == ValueType::Delete
    }
}

/// Little-endian fixed-width readers shared by the on-disk formats.
///
/// Callers bounds-check first; these only fail on a short slice, which is
/// reported as corruption rather than a panic.
pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::Corruption(format!("short read of u32 at {offset}")))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| Error::Corruption(format!("short read of u64 at {offset}")))
}

/// One staged operation: an upsert or a tombstone for `key`.
///
/// The unit shared by write batches, WAL records and the memtable apply
/// path, so a committed batch reaches disk without being re-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub value_type: ValueType,
    pub key: Key,
    pub value: Value,
}

impl Mutation {
    pub fn put(key: Key, value: Value) -> Self {
        Mutation {
            value_type: ValueType::Put,
            key,
            value,
        }
    }

    pub fn delete(key: Key) -> Self {
        Mutation {
            value_type: ValueType::Delete,
            key,
            value: Vec::new(),
        }
    }
}
