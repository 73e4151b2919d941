//! Write batches and the optional batch pool context.

use std::ops::{Deref, DerefMut};

use crate::types::Mutation;

/// An ordered set of puts and deletes applied atomically by
/// [`KvStore::commit_write_batch`](crate::store::KvStore::commit_write_batch).
///
/// Staging never touches disk. Operations on the same key apply in the
/// order they were staged, so the last one wins.
pub trait WriteBatch: Send {
    /// Stage an upsert.
    fn put(&mut self, key: &[u8], value: &[u8]);

    /// Stage a delete.
    fn delete(&mut self, key: &[u8]);

    /// Drop every staged operation. Keeps the allocation for reuse.
    fn clear(&mut self);

    /// Number of staged operations.
    fn count(&self) -> usize;

    /// Release the batch. Same as dropping it.
    fn destroy(self)
    where
        Self: Sized,
    {
        drop(self);
    }

    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Write batch for [`LsmStore`](crate::store::LsmStore).
///
/// Holds the operations exactly as they will be logged: a commit turns the
/// whole batch into one WAL record.
#[derive(Debug, Default, Clone)]
pub struct LsmWriteBatch {
    ops: Vec<Mutation>,
}

impl LsmWriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(ops: usize) -> Self {
        LsmWriteBatch {
            ops: Vec::with_capacity(ops),
        }
    }

    /// Staged operations in order.
    pub fn ops(&self) -> &[Mutation] {
        &self.ops
    }

    /// Capacity retained across `clear`.
    pub fn capacity(&self) -> usize {
        self.ops.capacity()
    }
}

impl WriteBatch for LsmWriteBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(Mutation::put(key.to_vec(), value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.ops.push(Mutation::delete(key.to_vec()));
    }

    fn clear(&mut self) {
        self.ops.clear();
    }

    fn count(&self) -> usize {
        self.ops.len()
    }
}

/// Something a caller can pass to `get_write_batch` to hand back a batch it
/// keeps around between commits.
///
/// The store only reads from the context. A batch it returns is still owned
/// by the context, and clearing it before reuse is the caller's job.
pub trait BatchContext<B> {
    fn write_batch(&mut self) -> Option<&mut B>;
}

/// A context holding at most one reusable batch.
#[derive(Debug)]
pub struct BatchSlot<B> {
    batch: Option<B>,
}

impl<B> BatchSlot<B> {
    pub fn new(batch: B) -> Self {
        BatchSlot { batch: Some(batch) }
    }

    pub fn empty() -> Self {
        BatchSlot { batch: None }
    }

    /// Put a batch into the slot, returning the one it replaces.
    pub fn set(&mut self, batch: B) -> Option<B> {
        self.batch.replace(batch)
    }

    pub fn take(&mut self) -> Option<B> {
        self.batch.take()
    }

    pub fn get(&self) -> Option<&B> {
        self.batch.as_ref()
    }
}

impl<B> Default for BatchSlot<B> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<B> BatchContext<B> for BatchSlot<B> {
    fn write_batch(&mut self) -> Option<&mut B> {
        self.batch.as_mut()
    }
}

/// Batch handed out by `get_write_batch`: either borrowed from a context or
/// freshly created and owned by the caller.
#[derive(Debug)]
pub enum PooledBatch<'a, B> {
    Pooled(&'a mut B),
    Fresh(B),
}

impl<B> PooledBatch<'_, B> {
    /// True if the batch came from a context.
    pub fn is_pooled(&self) -> bool {
        matches!(self, PooledBatch::Pooled(_))
    }

    /// The owned batch, or `None` for a pooled one (it stays with its
    /// context).
    pub fn into_fresh(self) -> Option<B> {
        match self {
            PooledBatch::Pooled(_) => None,
            PooledBatch::Fresh(batch) => Some(batch),
        }
    }
}

impl<B> Deref for PooledBatch<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        match self {
            PooledBatch::Pooled(batch) => batch,
            PooledBatch::Fresh(batch) => batch,
        }
    }
}

impl<B> DerefMut for PooledBatch<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        match self {
            PooledBatch::Pooled(batch) => batch,
            PooledBatch::Fresh(batch) => batch,
        }
    }
}
