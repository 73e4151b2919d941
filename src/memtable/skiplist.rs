use rand::Rng;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::ValueType;

pub const MAX_HEIGHT: usize = 12;

/// Index of the head sentinel in the arena.
const HEAD: usize = 0;

/// Arena node. `forward[l]` is the index of the next node on level `l`;
/// level 0 links every node in key order.
struct SkipNode {
    key: Vec<u8>,
    value: Vec<u8>,
    value_type: ValueType,
    forward: Vec<Option<usize>>,
}

/// Sorted map from key to `(ValueType, value)` backing the memtable.
///
/// Nodes live in a `Vec` and link by index. They are never unlinked: an
/// overwrite replaces the value in place and a delete stores a tombstone.
pub struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    size_bytes: usize,
}

impl SkipList {
    pub fn new() -> Self {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            value_type: ValueType::Put,
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
        }
    }

    /// Insert or overwrite a live value.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.insert_entry(key, ValueType::Put, value);
    }

    /// Insert a tombstone for `key`.
    pub fn insert_tombstone(&mut self, key: Vec<u8>) {
        self.insert_entry(key, ValueType::Delete, Vec::new());
    }

    fn insert_entry(&mut self, key: Vec<u8>, value_type: ValueType, value: Vec<u8>) {
        let mut update = [HEAD; MAX_HEIGHT];
        let found = self.find_greater_or_equal(&key, Some(&mut update));

        if let Some(idx) = found {
            let node = &mut self.nodes[idx];
            if node.key == key {
                self.size_bytes = self.size_bytes - node.value.len() + value.len();
                node.value = value;
                node.value_type = value_type;
                return;
            }
        }

        let height = self.random_height();
        if height > self.height {
            // update[] already holds HEAD for the new levels
            self.height = height;
        }

        let idx = self.nodes.len();
        let mut forward = vec![None; height];
        for (level, slot) in forward.iter_mut().enumerate() {
            *slot = self.nodes[update[level]].forward[level];
        }

        self.size_bytes += key.len() + value.len() + height * std::mem::size_of::<usize>();
        self.nodes.push(SkipNode {
            key,
            value,
            value_type,
            forward,
        });
        for (level, &prev) in update.iter().enumerate().take(height) {
            self.nodes[prev].forward[level] = Some(idx);
        }
        self.len += 1;
    }

    /// Look up a key. Returns the stored entry, tombstones included.
    pub fn get_entry(&self, key: &[u8]) -> Option<(ValueType, &[u8])> {
        let idx = self.find_greater_or_equal(key, None)?;
        let node = &self.nodes[idx];
        (node.key == key).then(|| (node.value_type, node.value.as_slice()))
    }

    /// Look up a key. Returns the value if found and not deleted.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        match self.get_entry(key) {
            Some((ValueType::Put, v)) => Some(v),
            _ => None,
        }
    }

    /// Number of entries in the skip list (tombstones included).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Key, value and pointer bytes held. Drives the flush threshold.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// All entries in key order, tombstones included.
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            current: self.nodes[HEAD].forward[0],
        }
    }

    /// Walk down from the top level, returning the first node with
    /// key >= target. When `update` is given, records the last node visited
    /// at each level (the splice points for an insert).
    fn find_greater_or_equal(
        &self,
        key: &[u8],
        mut update: Option<&mut [usize; MAX_HEIGHT]>,
    ) -> Option<usize> {
        let mut current = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[current].forward[level] {
                if self.nodes[next].key.as_slice() < key {
                    current = next;
                } else {
                    break;
                }
            }
            if let Some(update) = update.as_deref_mut() {
                update[level] = current;
            }
        }
        self.nodes[current].forward[0]
    }

    /// Geometric height, p = 1/4 per extra level.
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_ratio(1, 4) {
            height += 1;
        }
        height
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Follows level 0 forward pointers; `seek` uses the upper levels.
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    current: Option<usize>,
}

impl<'a> SkipListIterator<'a> {
    fn node(&self) -> &'a SkipNode {
        let idx = self.current.expect("iterator is not valid");
        &self.list.nodes[idx]
    }
}

impl StorageIterator for SkipListIterator<'_> {
    fn key(&self) -> &[u8] {
        &self.node().key
    }

    fn value(&self) -> &[u8] {
        &self.node().value
    }

    fn value_type(&self) -> ValueType {
        self.node().value_type
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(idx) = self.current {
            self.current = self.list.nodes[idx].forward[0];
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.current = self.list.find_greater_or_equal(key, None);
        Ok(())
    }
}
