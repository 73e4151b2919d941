use crate::bloom::BloomFilter;

/// Convenience builder for constructing a bloom filter during SSTable creation.
///
/// The final key count of a table isn't known until it is finished (flushes
/// and compaction outputs are cut by size), so keys are buffered and the
/// filter is sized for the real count at `build`.
pub struct BloomFilterBuilder {
    keys: Vec<Vec<u8>>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    /// Create a builder expecting approximately `estimated_keys` keys.
    pub fn new(estimated_keys: usize, false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            keys: Vec::with_capacity(estimated_keys),
            false_positive_rate,
        }
    }

    /// Add a key to the bloom filter being built.
    pub fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    /// Number of keys added so far.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Finalize and return the bloom filter.
    pub fn build(&self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.keys.len().max(1), self.false_positive_rate);
        for key in &self.keys {
            filter.insert(key);
        }
        filter
    }
}
