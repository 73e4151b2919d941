pub mod builder;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};
use crate::types::{read_u32, read_u64};

/// Per-table key filter: answers "definitely absent" or "maybe present".
///
/// Point reads of metadata keys (term, vote, commit index) usually hit the
/// memtable or the newest table; the filter lets every older table be
/// skipped without touching a data block.
///
/// Sizing for `n` keys at false positive rate `p`:
///
/// ```text
/// bits_per_key = -log2(p) / ln(2)        (≈ 9.6 for 1%)
/// probes       = bits_per_key * ln(2)    (≈ 7 for 1%)
/// ```
///
/// Probes use double hashing over the two halves of one xxh3-128 hash:
/// `bit_i = (h1 + i * h2) mod num_bits`.
///
/// Encoded form: `[probes u32][num_bits u32][words u64 LE...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    words: Vec<u64>,
    probes: u32,
    num_bits: u32,
}

/// Bounds that keep a filter sane whatever rate it's asked for.
const MIN_BITS: u32 = 64;
const MAX_PROBES: u32 = 30;

impl BloomFilter {
    /// Empty filter sized for `expected_keys` at `false_positive_rate`.
    /// Rates outside (0, 1) are clamped.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        let rate = false_positive_rate.clamp(1e-9, 0.5);
        let bits_per_key = -rate.log2() / std::f64::consts::LN_2;

        let num_bits = ((expected_keys.max(1) as f64) * bits_per_key).ceil();
        let num_bits = (num_bits.min(u32::MAX as f64) as u32).max(MIN_BITS);
        let probes = ((bits_per_key * std::f64::consts::LN_2).round() as u32).clamp(1, MAX_PROBES);

        BloomFilter {
            words: vec![0; (num_bits as usize).div_ceil(64)],
            probes,
            num_bits,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        for bit in self.probe_bits(key) {
            self.words[bit / 64] |= 1 << (bit % 64);
        }
    }

    /// False means the key was never inserted.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.probe_bits(key)
            .all(|bit| self.words[bit / 64] & (1 << (bit % 64)) != 0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.words.len() * 8);
        buf.extend_from_slice(&self.probes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let probes = read_u32(data, 0)?;
        let num_bits = read_u32(data, 4)?;
        if probes == 0 || probes > MAX_PROBES || num_bits < MIN_BITS {
            return Err(Error::Corruption(format!(
                "bad bloom filter header: {probes} probes, {num_bits} bits"
            )));
        }
        let num_words = (num_bits as usize).div_ceil(64);
        if data.len() != 8 + num_words * 8 {
            return Err(Error::Corruption(format!(
                "bloom filter is {} bytes, expected {} for {num_bits} bits",
                data.len(),
                8 + num_words * 8
            )));
        }
        let words = data[8..]
            .chunks_exact(8)
            .map(|chunk| read_u64(chunk, 0))
            .collect::<Result<Vec<u64>>>()?;
        Ok(BloomFilter {
            words,
            probes,
            num_bits,
        })
    }

    pub fn probes(&self) -> u32 {
        self.probes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn probe_bits(&self, key: &[u8]) -> impl Iterator<Item = usize> + use<> {
        let hash = xxh3_128(key);
        let (h1, h2) = (hash as u64, (hash >> 64) as u64);
        let num_bits = self.num_bits as u64;
        (0..self.probes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits) as usize)
    }
}
