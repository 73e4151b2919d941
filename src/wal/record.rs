use crate::error::{Error, Result};
use crate::types::{Mutation, ValueType, read_u32};

/// A single record in the WAL: one committed write batch.
///
/// On-disk format:
/// ```text
/// ┌──────────┬─────────┬───────────┬──────────────────────────────────────────────┐
/// │ CRC (4B) │ Len(4B) │ Count(4B) │ Op*: Type(1B) KeyLen(4B) ValLen(4B) Key Val │
/// └──────────┴─────────┴───────────┴──────────────────────────────────────────────┘
/// ```
///
/// CRC covers everything after the CRC field itself. A whole batch lives in
/// one record, so a torn write loses the batch as a unit: recovery never
/// sees half of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WALRecord {
    pub ops: Vec<Mutation>,
}

// Header sizes
const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const COUNT_SIZE: usize = 4;
const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE + COUNT_SIZE;
const OP_HEADER_SIZE: usize = 1 + 4 + 4;

impl WALRecord {
    /// A record holding a single put.
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        WALRecord {
            ops: vec![Mutation::put(key, value)],
        }
    }

    /// A record holding a single delete.
    pub fn delete(key: Vec<u8>) -> Self {
        WALRecord {
            ops: vec![Mutation::delete(key)],
        }
    }

    /// Serialize this record to bytes (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        encode_ops(&self.ops)
    }

    /// Deserialize a record from bytes. Returns error if CRC doesn't match.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption("record too short".into()));
        }

        let stored_crc = read_u32(data, 0)?;
        let payload_len = read_u32(data, CRC_SIZE)? as usize;

        let total_len = CRC_SIZE + LEN_SIZE + payload_len;
        if payload_len < COUNT_SIZE || data.len() < total_len {
            return Err(Error::Corruption("record truncated".into()));
        }

        let computed_crc = crc32fast::hash(&data[CRC_SIZE..total_len]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption("CRC mismatch".into()));
        }

        let count = read_u32(data, CRC_SIZE + LEN_SIZE)? as usize;
        let mut offset = HEADER_SIZE;
        // Each op needs at least its header; don't trust `count` for capacity.
        let mut ops = Vec::with_capacity(count.min(payload_len / OP_HEADER_SIZE));

        for _ in 0..count {
            if offset + OP_HEADER_SIZE > total_len {
                return Err(Error::Corruption("op header exceeds record".into()));
            }
            let value_type = ValueType::from_u8(data[offset])?;
            let key_len = read_u32(data, offset + 1)? as usize;
            let val_len = read_u32(data, offset + 5)? as usize;
            offset += OP_HEADER_SIZE;

            if offset + key_len + val_len > total_len {
                return Err(Error::Corruption("op length exceeds record".into()));
            }
            let key = data[offset..offset + key_len].to_vec();
            offset += key_len;
            let value = data[offset..offset + val_len].to_vec();
            offset += val_len;

            ops.push(Mutation {
                value_type,
                key,
                value,
            });
        }

        if offset != total_len {
            return Err(Error::Corruption("trailing bytes in record".into()));
        }

        Ok(WALRecord { ops })
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        encoded_size(&self.ops)
    }
}

/// Encode a batch of operations as one WAL record without copying them into
/// a `WALRecord` first.
pub fn encode_ops(ops: &[Mutation]) -> Vec<u8> {
    let total_len = encoded_size(ops);
    let payload_len = total_len - CRC_SIZE - LEN_SIZE;

    let mut buf = Vec::with_capacity(total_len);

    // Reserve space for CRC (we'll fill it at the end)
    buf.extend_from_slice(&[0u8; CRC_SIZE]);
    buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
    buf.extend_from_slice(&(ops.len() as u32).to_le_bytes());

    for op in ops {
        buf.push(op.value_type as u8);
        buf.extend_from_slice(&(op.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(op.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&op.key);
        buf.extend_from_slice(&op.value);
    }

    let crc = crc32fast::hash(&buf[CRC_SIZE..]);
    buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

    buf
}

fn encoded_size(ops: &[Mutation]) -> usize {
    HEADER_SIZE
        + ops
            .iter()
            .map(|op| OP_HEADER_SIZE + op.key.len() + op.value.len())
            .sum::<usize>()
}
