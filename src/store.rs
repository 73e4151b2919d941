//! The persistence contract a replicated log needs from an ordered KV
//! engine, and its LSM-backed implementation.

use std::ops::Bound;
use std::path::Path;

use tracing::debug;

use crate::batch::{BatchContext, LsmWriteBatch, PooledBatch, WriteBatch};
use crate::db::{DB, Options, Stats};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::types::Mutation;

/// Durable, ordered key-value storage for log entries and metadata.
///
/// Keys compare as unsigned bytes. Every write is durable before it
/// returns. After [`close`](KvStore::close), every operation fails with
/// [`Error::Closed`].
pub trait KvStore: Send + Sync {
    /// Batch type accepted by `commit_write_batch`.
    type Batch: WriteBatch + Default;

    /// Engine name, for logs.
    fn name(&self) -> &'static str;

    /// Release the engine. Idempotent.
    fn close(&self) -> Result<()>;

    /// Look up `key` and hand the value to `consume`, or `None` if the key
    /// is absent. Absence is not an error. The value slice is only valid
    /// for the duration of the call.
    fn get_value<F>(&self, key: &[u8], consume: F) -> Result<()>
    where
        F: FnOnce(Option<&[u8]>) -> Result<()>;

    /// Durable upsert.
    fn save_value(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Durable delete. Deleting an absent key succeeds.
    fn delete_value(&self, key: &[u8]) -> Result<()>;

    /// Visit keys in `[first, last)` (or `[first, last]` when
    /// `last_inclusive`) in ascending order. The visitor returns `Ok(false)`
    /// to stop early; its errors end the scan and are returned unchanged.
    fn iterate_value<F>(&self, first: &[u8], last: &[u8], last_inclusive: bool, visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>;

    /// The context's batch if it offers one, otherwise a new batch.
    ///
    /// A pooled batch is returned as-is: the caller clears it before reuse.
    fn get_write_batch<'a>(
        &self,
        ctx: Option<&'a mut dyn BatchContext<Self::Batch>>,
    ) -> PooledBatch<'a, Self::Batch> {
        match ctx.and_then(|ctx| ctx.write_batch()) {
            Some(batch) => PooledBatch::Pooled(batch),
            None => PooledBatch::Fresh(Self::Batch::default()),
        }
    }

    /// Apply every staged operation atomically and durably. On failure none
    /// of them is visible and the batch is left as it was.
    fn commit_write_batch(&self, batch: &Self::Batch) -> Result<()>;

    /// Commit a batch of deletes. Same semantics as `commit_write_batch`.
    fn commit_delete_batch(&self, batch: &Self::Batch) -> Result<()> {
        self.commit_write_batch(batch)
    }

    /// Delete every key in `[first, last)` in one atomic commit. No commit
    /// is issued if the range is empty.
    fn remove_entries(&self, first: &[u8], last: &[u8]) -> Result<()> {
        let mut batch = Self::Batch::default();
        self.iterate_value(first, last, false, |key, _| {
            batch.delete(key);
            Ok(true)
        })?;
        if batch.count() > 0 {
            self.commit_delete_batch(&batch)?;
        }
        Ok(())
    }

    /// Ask the engine to reclaim space for `[first, last]`. Logical content
    /// is unchanged.
    fn compaction(&self, first: &[u8], last: &[u8]) -> Result<()>;
}

/// The store variant in use.
pub type DefaultKvStore = LsmStore;

/// Open the store at `dir`, keeping WAL segments in `wal_dir` (or in `dir`
/// when `wal_dir` is empty).
pub fn new_kv_store(dir: impl AsRef<Path>, wal_dir: impl AsRef<Path>) -> Result<DefaultKvStore> {
    LsmStore::open(dir, wal_dir)
}

/// [`KvStore`] backed by the crate's LSM-tree engine.
pub struct LsmStore {
    db: DB,
}

impl LsmStore {
    /// Open or create a store with default tuning.
    pub fn open(dir: impl AsRef<Path>, wal_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(Options::new(dir.as_ref()).with_wal_dir(wal_dir.as_ref()))
    }

    pub fn open_with_options(opts: Options) -> Result<Self> {
        let db = DB::open(opts)?;
        debug!(dir = %db.options().data_dir.display(), "store ready");
        Ok(LsmStore { db })
    }

    pub fn stats(&self) -> Stats {
        self.db.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_closed()
    }

    /// Flush buffered writes into a table. Mostly useful for tests.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(Error::write)
    }

    pub fn options(&self) -> &Options {
        self.db.options()
    }
}

impl KvStore for LsmStore {
    type Batch = LsmWriteBatch;

    fn name(&self) -> &'static str {
        "lsm"
    }

    fn close(&self) -> Result<()> {
        self.db.close()
    }

    fn get_value<F>(&self, key: &[u8], consume: F) -> Result<()>
    where
        F: FnOnce(Option<&[u8]>) -> Result<()>,
    {
        let value = self.db.get(key).map_err(Error::read)?;
        consume(value.as_deref())
    }

    fn save_value(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .write(&[Mutation::put(key.to_vec(), value.to_vec())])
            .map_err(Error::write)
    }

    fn delete_value(&self, key: &[u8]) -> Result<()> {
        self.db
            .write(&[Mutation::delete(key.to_vec())])
            .map_err(Error::write)
    }

    fn iterate_value<F>(&self, first: &[u8], last: &[u8], last_inclusive: bool, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let upper = if last_inclusive {
            Bound::Included(last.to_vec())
        } else {
            Bound::Excluded(last.to_vec())
        };
        // A damaged block is fatal wherever the cursor meets it, including
        // the initial positioning.
        let mut iter = self.db.iter(first, upper).map_err(|e| match e {
            Error::Corruption(_) => Error::iteration_fatal(e),
            other => Error::read(other),
        })?;
        while iter.is_valid() {
            if !visit(iter.key(), iter.value())? {
                break;
            }
            iter.next().map_err(Error::iteration_fatal)?;
        }
        Ok(())
    }

    fn commit_write_batch(&self, batch: &LsmWriteBatch) -> Result<()> {
        self.db.write(batch.ops()).map_err(Error::commit)
    }

    fn compaction(&self, first: &[u8], last: &[u8]) -> Result<()> {
        self.db.compact_range(first, last).map_err(Error::compaction)
    }
}
