use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::binary_heap::PeekMut;
use std::ops::Bound;

use crate::error::Result;
use crate::iterator::{StorageIterator, within_upper};
use crate::types::ValueType;

/// One source inside the merge heap. `idx` is the source priority:
/// 0 = newest (memtable), higher = older.
struct HeapEntry {
    idx: usize,
    iter: Box<dyn StorageIterator>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap; reverse so the smallest (key, idx) is on top.
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter
            .key()
            .cmp(other.iter.key())
            .then(self.idx.cmp(&other.idx))
            .reverse()
    }
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtable + all SSTable levels
/// - Compaction (merging SSTables)
///
/// Deduplication: only the newest version of each key is yielded.
/// Tombstones shadow older versions and are then skipped, so consumers only
/// ever see live entries. With an upper bound, the merge ends at the first
/// key past it and never walks the tombstones beyond.
pub struct MergeIterator {
    heap: BinaryHeap<HeapEntry>,
    current: Option<HeapEntry>,
    upper: Bound<Vec<u8>>,
}

impl MergeIterator {
    /// Create a new MergeIterator from multiple sorted sources.
    /// Sources are ordered by priority: index 0 = newest (memtable),
    /// higher indices = older (deeper SSTable levels).
    pub fn new(iters: Vec<Box<dyn StorageIterator>>) -> Result<Self> {
        Self::bounded(iters, Bound::Unbounded)
    }

    /// Like [`new`](Self::new), but invalid once past `upper`.
    pub fn bounded(iters: Vec<Box<dyn StorageIterator>>, upper: Bound<Vec<u8>>) -> Result<Self> {
        let mut heap = BinaryHeap::new();
        for (idx, iter) in iters.into_iter().enumerate() {
            if iter.is_valid() {
                heap.push(HeapEntry { idx, iter });
            }
        }
        let current = heap.pop();
        let mut merged = MergeIterator {
            heap,
            current,
            upper,
        };
        merged.skip_tombstones()?;
        Ok(merged)
    }

    /// Step past the current key in every source, without tombstone
    /// filtering.
    fn advance(&mut self) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };

        // Older versions of the same key sit right under the winner.
        while let Some(mut inner) = self.heap.peek_mut() {
            if inner.iter.key() != current.iter.key() {
                break;
            }
            if let Err(e) = inner.iter.next() {
                PeekMut::pop(inner);
                return Err(e);
            }
            if !inner.iter.is_valid() {
                PeekMut::pop(inner);
            }
        }

        current.iter.next()?;

        if !current.iter.is_valid() {
            self.current = self.heap.pop();
            return Ok(());
        }

        if let Some(mut inner) = self.heap.peek_mut() {
            if *current < *inner {
                std::mem::swap(&mut *inner, current);
            }
        }
        Ok(())
    }

    fn skip_tombstones(&mut self) -> Result<()> {
        while self.is_valid() && self.value_type().is_tombstone() {
            self.advance()?;
        }
        Ok(())
    }

    fn current(&self) -> &HeapEntry {
        self.current.as_ref().expect("iterator is not valid")
    }
}

impl StorageIterator for MergeIterator {
    fn key(&self) -> &[u8] {
        self.current().iter.key()
    }

    fn value(&self) -> &[u8] {
        self.current().iter.value()
    }

    fn value_type(&self) -> ValueType {
        self.current().iter.value_type()
    }

    fn is_valid(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.iter.is_valid() && within_upper(c.iter.key(), &self.upper))
    }

    fn next(&mut self) -> Result<()> {
        self.advance()?;
        self.skip_tombstones()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let mut entries: Vec<HeapEntry> = self.heap.drain().collect();
        entries.extend(self.current.take());
        for entry in entries.iter_mut() {
            entry.iter.seek(key)?;
        }
        self.heap = entries.into_iter().filter(|e| e.iter.is_valid()).collect();
        self.current = self.heap.pop();
        self.skip_tombstones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memtable::MemTable;

    fn source(entries: &[(&str, Option<&str>)]) -> Box<dyn StorageIterator> {
        let mut mt = MemTable::new(usize::MAX);
        for (k, v) in entries {
            match v {
                Some(v) => mt.put(k.as_bytes().to_vec(), v.as_bytes().to_vec()),
                None => mt.delete(k.as_bytes().to_vec()),
            }
        }
        Box::new(mt.snapshot_range(b"", &Bound::Unbounded).unwrap())
    }

    fn collect(mut it: MergeIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        while it.is_valid() {
            out.push((it.key().to_vec(), it.value().to_vec()));
            it.next().unwrap();
        }
        out
    }

    #[test]
    fn newest_source_wins() {
        let newer = source(&[("a", Some("new")), ("c", Some("c1"))]);
        let older = source(&[("a", Some("old")), ("b", Some("b0"))]);
        let it = MergeIterator::new(vec![newer, older]).unwrap();
        assert_eq!(
            collect(it),
            vec![
                (b"a".to_vec(), b"new".to_vec()),
                (b"b".to_vec(), b"b0".to_vec()),
                (b"c".to_vec(), b"c1".to_vec()),
            ]
        );
    }

    #[test]
    fn tombstones_shadow_older_values() {
        let newer = source(&[("a", None), ("b", None)]);
        let older = source(&[("a", Some("1")), ("b", Some("2")), ("c", Some("3"))]);
        let it = MergeIterator::new(vec![newer, older]).unwrap();
        assert_eq!(collect(it), vec![(b"c".to_vec(), b"3".to_vec())]);
    }

    #[test]
    fn seek_repositions_all_sources() {
        let a = source(&[("a", Some("1")), ("d", Some("4"))]);
        let b = source(&[("b", Some("2")), ("e", Some("5"))]);
        let mut it = MergeIterator::new(vec![a, b]).unwrap();
        it.seek(b"c").unwrap();
        assert_eq!(it.key(), b"d");
        it.next().unwrap();
        assert_eq!(it.key(), b"e");
    }

    #[test]
    fn empty_sources() {
        let it = MergeIterator::new(vec![source(&[]), source(&[])]).unwrap();
        assert!(!it.is_valid());
    }

    /// Yields its entries, then fails instead of running out.
    struct BrokenTail {
        entries: Vec<(&'static [u8], ValueType)>,
        pos: usize,
    }

    impl StorageIterator for BrokenTail {
        fn key(&self) -> &[u8] {
            self.entries[self.pos].0
        }

        fn value(&self) -> &[u8] {
            b""
        }

        fn value_type(&self) -> ValueType {
            self.entries[self.pos].1
        }

        fn is_valid(&self) -> bool {
            self.pos < self.entries.len()
        }

        fn next(&mut self) -> Result<()> {
            if self.pos + 1 == self.entries.len() {
                return Err(Error::Corruption("read past the last entry".into()));
            }
            self.pos += 1;
            Ok(())
        }

        fn seek(&mut self, _key: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn upper_bound_stops_before_trailing_tombstones() {
        let tail = || {
            Box::new(BrokenTail {
                entries: vec![
                    (&b"a"[..], ValueType::Put),
                    (&b"b"[..], ValueType::Delete),
                    (&b"c"[..], ValueType::Delete),
                ],
                pos: 0,
            }) as Box<dyn StorageIterator>
        };

        let mut it = MergeIterator::bounded(vec![tail()], Bound::Excluded(b"b".to_vec())).unwrap();
        assert_eq!(it.key(), b"a");
        it.next().unwrap();
        assert!(!it.is_valid());

        // Unbounded, the same merge has to walk the tombstones and hits the end
        let mut it = MergeIterator::new(vec![tail()]).unwrap();
        assert!(it.next().is_err());
    }

    #[test]
    fn inclusive_upper_bound_keeps_last_key() {
        let src = source(&[("a", Some("1")), ("b", Some("2")), ("c", Some("3"))]);
        let it = MergeIterator::bounded(vec![src], Bound::Included(b"b".to_vec())).unwrap();
        assert_eq!(
            collect(it),
            vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
    }
}
