//! The LSM-tree engine.
//!
//! Write path: WAL append (fsync) → memtable → flush to a level 0 SSTable
//! when the memtable is full → compaction into level 1 when level 0 grows
//! past its trigger. Read path: memtable, then level 0 newest first, then
//! level 1.

pub mod version;

use std::fs::{self, File, TryLockError};
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::compaction::{self, CompactionConfig};
use crate::error::{Error, Result};
use crate::iterator::merge::MergeIterator;
use crate::iterator::{StorageIterator, within_upper};
use crate::manifest::Manifest;
use crate::memtable::MemTable;
use crate::paths::{LOCK_FILE, SST_EXT, WAL_EXT, list_numbered, sst_path, sync_dir};
use crate::sstable::{SSTable, SSTableBuilder, SSTableIterator};
use crate::types::{Mutation, ValueType};
use crate::wal::reader::WALReader;
use crate::wal::writer::WALManager;
use crate::wal::SyncPolicy;
use version::Version;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the lock file, manifest and SSTables.
    pub data_dir: PathBuf,
    /// Directory for WAL segments; `None` keeps them in `data_dir`.
    pub wal_dir: Option<PathBuf>,
    /// Memtable size that triggers a flush.
    pub memtable_size: usize,
    /// Target size of SSTable data blocks.
    pub block_size: usize,
    /// Bloom filter false positive rate per table.
    pub bloom_fpr: f64,
    /// Number of level 0 tables that triggers a compaction.
    pub l0_compaction_trigger: usize,
    /// Size at which compaction output is cut into a new table.
    pub target_file_size: u64,
    pub sync_policy: SyncPolicy,
}

impl Options {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Options {
            data_dir: data_dir.into(),
            wal_dir: None,
            memtable_size: 4 * 1024 * 1024,
            block_size: 4096,
            bloom_fpr: 0.01,
            l0_compaction_trigger: 4,
            target_file_size: 2 * 1024 * 1024,
            sync_policy: SyncPolicy::EveryWrite,
        }
    }

    /// Put WAL segments in `dir`. An empty path means "same as data_dir".
    pub fn with_wal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.wal_dir = (!dir.as_os_str().is_empty()).then_some(dir);
        self
    }

    pub fn with_memtable_size(mut self, bytes: usize) -> Self {
        self.memtable_size = bytes;
        self
    }

    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_bloom_fpr(mut self, fpr: f64) -> Self {
        self.bloom_fpr = fpr;
        self
    }

    pub fn with_l0_compaction_trigger(mut self, tables: usize) -> Self {
        self.l0_compaction_trigger = tables.max(1);
        self
    }

    pub fn with_target_file_size(mut self, bytes: u64) -> Self {
        self.target_file_size = bytes;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Where WAL segments live.
    pub fn wal_dir(&self) -> &Path {
        self.wal_dir.as_deref().unwrap_or(&self.data_dir)
    }

    fn compaction_config(&self) -> CompactionConfig {
        CompactionConfig {
            block_size: self.block_size,
            bloom_fpr: self.bloom_fpr,
            target_file_size: self.target_file_size,
        }
    }
}

/// Counters exposed for tests and monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Batch commits requested (single-key writes count as one each).
    pub commits: u64,
    /// WAL fsyncs issued.
    pub wal_syncs: u64,
    /// Memtable flushes.
    pub flushes: u64,
    /// Compactions run.
    pub compactions: u64,
    pub l0_tables: usize,
    pub l1_tables: usize,
}

#[derive(Default)]
struct Counters {
    commits: AtomicU64,
    wal_syncs: AtomicU64,
    flushes: AtomicU64,
    compactions: AtomicU64,
}

/// State that only exists while the engine is open.
struct Inner {
    memtable: MemTable,
    version: Version,
    wal: WALManager,
    next_file_id: u64,
    /// Set once a WAL append or rotation fails. The active segment may end in
    /// a torn record that would hide anything appended after it.
    wal_failed: Option<String>,
    /// Holds the exclusive lock on the data directory until dropped.
    _lock: File,
}

impl Inner {
    fn check_wal(&self) -> Result<()> {
        match &self.wal_failed {
            Some(cause) => Err(Error::WalFailed(cause.clone())),
            None => Ok(()),
        }
    }

    fn fail_wal(&mut self, cause: &Error) {
        error!(error = %cause, "WAL failed; refusing further writes until reopened");
        self.wal_failed = Some(cause.to_string());
    }
}

/// An open LSM-tree database.
///
/// Writers serialize on the internal lock; readers hold it only long enough
/// to take a snapshot. After `close`, every operation fails with
/// `Error::Closed`.
pub struct DB {
    opts: Options,
    inner: RwLock<Option<Inner>>,
    counters: Counters,
}

impl DB {
    /// Open or create a database.
    pub fn open(opts: Options) -> Result<DB> {
        let data_dir = opts.data_dir.clone();
        Self::open_inner(opts).map_err(|e| Error::open(data_dir, e))
    }

    fn open_inner(opts: Options) -> Result<DB> {
        fs::create_dir_all(&opts.data_dir)?;
        fs::create_dir_all(opts.wal_dir())?;
        let lock = lock_dir(&opts.data_dir)?;

        let manifest = Manifest::load(&opts.data_dir)?.unwrap_or(Manifest {
            next_file_id: 1,
            log_number: 0,
            tables: Vec::new(),
        });

        let mut version = Version::default();
        for meta in &manifest.tables {
            let table = Arc::new(SSTable::open(&sst_path(&opts.data_dir, meta.id))?);
            match meta.level {
                0 => version.l0.push(table),
                _ => version.l1.push(table),
            }
        }
        remove_orphan_tables(&opts.data_dir, &manifest)?;

        let (memtable, next_wal_id) = replay_wal(&opts, manifest.log_number)?;
        let wal = WALManager::with_first_id(
            opts.wal_dir(),
            opts.sync_policy,
            next_wal_id.max(manifest.log_number),
        )?;

        info!(
            dir = %opts.data_dir.display(),
            wal_dir = %opts.wal_dir().display(),
            tables = version.num_tables(),
            recovered_entries = memtable.len(),
            "opened store"
        );

        let db = DB {
            inner: RwLock::new(Some(Inner {
                memtable,
                version,
                wal,
                next_file_id: manifest.next_file_id,
                wal_failed: None,
                _lock: lock,
            })),
            opts,
            counters: Counters::default(),
        };

        // A large recovered WAL may already exceed the flush threshold.
        {
            let mut guard = db.inner.write();
            let inner = guard.as_mut().ok_or(Error::Closed)?;
            if inner.memtable.is_full() {
                db.flush_locked(inner)?;
            }
        }
        Ok(db)
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Look up the live value for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let version = {
            let guard = self.inner.read();
            let inner = guard.as_ref().ok_or(Error::Closed)?;
            match inner.memtable.get_entry(key) {
                Some((ValueType::Put, v)) => return Ok(Some(v.to_vec())),
                Some((ValueType::Delete, _)) => return Ok(None),
                None => inner.version.clone(),
            }
        };
        Ok(match version.get_entry(key)? {
            Some((ValueType::Put, v)) => Some(v),
            _ => None,
        })
    }

    /// Apply `ops` atomically: one WAL record, fsynced per the sync policy,
    /// then the memtable. Nothing is applied if the WAL append fails, and
    /// every later write, flush or compaction fails with `WalFailed`.
    pub fn write(&self, ops: &[Mutation]) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or(Error::Closed)?;
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        inner.check_wal()?;
        if ops.is_empty() {
            return Ok(());
        }

        let writer = inner.wal.active_writer();
        let syncs_before = writer.syncs();
        if let Err(e) = writer.append_batch(ops) {
            inner.fail_wal(&e);
            return Err(e);
        }
        let synced = inner.wal.active_writer().syncs() - syncs_before;
        self.counters.wal_syncs.fetch_add(synced, Ordering::Relaxed);

        for op in ops {
            match op.value_type {
                ValueType::Put => inner.memtable.put(op.key.clone(), op.value.clone()),
                ValueType::Delete => inner.memtable.delete(op.key.clone()),
            }
        }

        // The batch is already durable in the WAL; a failed flush is retried
        // on the next write.
        if inner.memtable.is_full() {
            if let Err(e) = self.flush_locked(inner) {
                warn!(error = %e, "memtable flush failed");
            }
        }
        Ok(())
    }

    /// Snapshot iterator over `[lower, upper)` / `[lower, upper]`.
    ///
    /// The memtable range is copied and the live tables are pinned, so the
    /// scan sees a point-in-time view regardless of concurrent writes,
    /// flushes or compactions.
    pub fn iter(&self, lower: &[u8], upper: Bound<Vec<u8>>) -> Result<DbIterator> {
        let (mem, version) = {
            let guard = self.inner.read();
            let inner = guard.as_ref().ok_or(Error::Closed)?;
            (inner.memtable.snapshot_range(lower, &upper)?, inner.version.clone())
        };

        let mut sources: Vec<Box<dyn StorageIterator>> = vec![Box::new(mem)];
        for table in &version.l0 {
            sources.push(Box::new(SSTableIterator::new_at(Arc::clone(table), lower)?));
        }
        for table in &version.l1 {
            let meta = table.meta();
            if meta.max_key.as_slice() < lower || !within_upper(&meta.min_key, &upper) {
                continue;
            }
            sources.push(Box::new(SSTableIterator::new_at(Arc::clone(table), lower)?));
        }

        Ok(DbIterator {
            inner: MergeIterator::bounded(sources, upper)?,
        })
    }

    /// Flush the memtable to a level 0 table, if it holds anything.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or(Error::Closed)?;
        self.flush_locked(inner)
    }

    /// Flush, then compact level 0 together with the level 1 tables
    /// overlapping `[first, last]`, dropping deleted entries.
    pub fn compact_range(&self, first: &[u8], last: &[u8]) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or(Error::Closed)?;
        self.flush_locked(inner)?;
        self.compact_locked(inner, Some((first, last)))
    }

    pub fn stats(&self) -> Stats {
        let (l0_tables, l1_tables) = match self.inner.read().as_ref() {
            Some(inner) => (inner.version.l0.len(), inner.version.l1.len()),
            None => (0, 0),
        };
        Stats {
            commits: self.counters.commits.load(Ordering::Relaxed),
            wal_syncs: self.counters.wal_syncs.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            compactions: self.counters.compactions.load(Ordering::Relaxed),
            l0_tables,
            l1_tables,
        }
    }

    /// Sync the WAL and release every resource, including the directory
    /// lock. Idempotent.
    pub fn close(&self) -> Result<()> {
        let Some(mut inner) = self.inner.write().take() else {
            return Ok(());
        };
        let result = inner.wal.active_writer().sync();
        info!(dir = %self.opts.data_dir.display(), "closed store");
        drop(inner);
        result
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<()> {
        inner.check_wal()?;
        if inner.memtable.is_empty() {
            return Ok(());
        }

        // New writes go to a fresh segment; the old one stays until the
        // table below is durable and the manifest stops referencing it.
        if let Err(e) = inner.wal.rotate() {
            inner.fail_wal(&e);
            return Err(e);
        }

        let id = inner.next_file_id;
        inner.next_file_id += 1;
        let path = sst_path(&self.opts.data_dir, id);
        let table = match self.write_level0(&path, id, &inner.memtable) {
            Ok(table) => table,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path) {
                    debug!(path = %path.display(), error = %rm, "no partial table to remove");
                }
                return Err(e);
            }
        };
        info!(
            id,
            entries = table.meta().entry_count,
            bytes = table.meta().file_size,
            "flushed memtable"
        );

        let mut version = inner.version.clone();
        version.l0.insert(0, Arc::clone(&table));
        if let Err(e) = self.install(inner, version) {
            table.mark_obsolete();
            return Err(e);
        }
        inner.memtable = MemTable::new(self.opts.memtable_size);
        inner.wal.delete_before(inner.wal.active_id())?;
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);

        if inner.version.l0.len() >= self.opts.l0_compaction_trigger {
            if let Err(e) = self.compact_locked(inner, None) {
                warn!(error = %e, "level 0 compaction failed");
            }
        }
        Ok(())
    }

    fn write_level0(&self, path: &Path, id: u64, memtable: &MemTable) -> Result<Arc<SSTable>> {
        let mut builder = SSTableBuilder::new(path, id, self.opts.block_size)?
            .with_level(0)
            .with_bloom_fpr(self.opts.bloom_fpr);
        let mut iter = memtable.iter();
        while iter.is_valid() {
            builder.add(iter.key(), iter.value_type(), iter.value())?;
            iter.next()?;
        }
        builder.finish()?;
        Ok(Arc::new(SSTable::open(path)?))
    }

    fn compact_locked(&self, inner: &mut Inner, range: Option<(&[u8], &[u8])>) -> Result<()> {
        let inputs = compaction::pick(&inner.version, range);
        if inputs.is_empty() {
            return Ok(());
        }

        let outputs = compaction::run(
            &self.opts.data_dir,
            &inputs,
            &self.opts.compaction_config(),
            &mut inner.next_file_id,
        )?;

        let input_ids: Vec<u64> = inputs.all().map(|t| t.meta().id).collect();
        let mut version = Version {
            l0: Vec::new(),
            l1: inner
                .version
                .l1
                .iter()
                .filter(|t| !input_ids.contains(&t.meta().id))
                .cloned()
                .chain(outputs.iter().cloned())
                .collect(),
        };
        version.l1.sort_by(|a, b| a.meta().min_key.cmp(&b.meta().min_key));

        if let Err(e) = self.install(inner, version) {
            for table in &outputs {
                table.mark_obsolete();
            }
            return Err(e);
        }
        for table in inputs.all() {
            table.mark_obsolete();
        }

        info!(
            inputs = input_ids.len(),
            outputs = outputs.len(),
            l1_tables = inner.version.l1.len(),
            "compacted"
        );
        self.counters.compactions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Make `version` durable in the manifest, then make it current.
    fn install(&self, inner: &mut Inner, version: Version) -> Result<()> {
        let manifest = Manifest {
            next_file_id: inner.next_file_id,
            log_number: inner.wal.active_id(),
            tables: version.metas(),
        };
        manifest.save(&self.opts.data_dir)?;
        inner.version = version;
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing store on drop");
        }
    }
}

/// Point-in-time scan over the engine, bounded above.
pub struct DbIterator {
    inner: MergeIterator,
}

impl StorageIterator for DbIterator {
    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn value_type(&self) -> ValueType {
        self.inner.value_type()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.inner.seek(key)
    }
}

/// Take the exclusive lock on `dir/LOCK`. Held for the life of the handle
/// and released by the OS if the process dies.
fn lock_dir(dir: &Path) -> Result<File> {
    let file = File::options()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(Error::Io(io::Error::new(
            io::ErrorKind::WouldBlock,
            "data directory is locked by another handle",
        ))),
        Err(TryLockError::Error(e)) => Err(Error::Io(e)),
    }
}

/// Delete `.sst` files the manifest doesn't know about: leftovers of a
/// flush or compaction that crashed before installing its result.
fn remove_orphan_tables(dir: &Path, manifest: &Manifest) -> Result<()> {
    let mut removed = false;
    for (id, path) in list_numbered(dir, SST_EXT)? {
        if manifest.tables.iter().all(|t| t.id != id) {
            warn!(path = %path.display(), "removing orphaned table");
            fs::remove_file(&path)?;
            removed = true;
        }
    }
    if removed {
        sync_dir(dir)?;
    }
    Ok(())
}

/// Rebuild the memtable from WAL segments at or after `log_number`.
/// Returns the memtable and the first unused segment id.
fn replay_wal(opts: &Options, log_number: u64) -> Result<(MemTable, u64)> {
    let wal_dir = opts.wal_dir();
    let mut memtable = MemTable::new(opts.memtable_size);
    let mut next_id = 1;

    for (id, path) in list_numbered(wal_dir, WAL_EXT)? {
        next_id = next_id.max(id + 1);
        if id < log_number {
            debug!(path = %path.display(), "removing flushed WAL segment");
            fs::remove_file(&path)?;
            continue;
        }

        let reader = WALReader::open(&path)?;
        let mut records = reader.records();
        let mut batches = 0usize;
        for record in records.by_ref() {
            for op in record.ops {
                match op.value_type {
                    ValueType::Put => memtable.put(op.key, op.value),
                    ValueType::Delete => memtable.delete(op.key),
                }
            }
            batches += 1;
        }
        let torn = records.torn_bytes();
        if torn > 0 {
            warn!(
                path = %path.display(),
                dropped_bytes = torn,
                "discarding torn WAL tail"
            );
        }
        debug!(path = %path.display(), batches, "replayed WAL segment");
    }

    Ok((memtable, next_id))
}
