use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use crate::error::Result;
use crate::paths::{WAL_EXT, list_numbered, sync_dir, wal_path};
use crate::types::Mutation;
use crate::wal::SyncPolicy;
use crate::wal::record::{WALRecord, encode_ops};

/// Appends batch records to one WAL segment.
///
/// Every append is pushed through the `BufWriter` into the page cache
/// straight away; whether it also reaches the disk (`sync_data`) before the
/// call returns is up to the [`SyncPolicy`].
pub struct WALWriter {
    out: BufWriter<File>,
    /// Segment length in bytes, including records from before this open.
    len: u64,
    policy: SyncPolicy,
    unsynced: usize,
    synced_at: Instant,
    syncs: u64,
}

impl WALWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn new(path: &Path, policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(WALWriter {
            out: BufWriter::new(file),
            len,
            policy,
            unsynced: 0,
            synced_at: Instant::now(),
            syncs: 0,
        })
    }

    pub fn append(&mut self, record: &WALRecord) -> Result<()> {
        self.append_batch(&record.ops)
    }

    /// Write `ops` as a single record, then sync if the policy says so.
    pub fn append_batch(&mut self, ops: &[Mutation]) -> Result<()> {
        let record = encode_ops(ops);
        self.out.write_all(&record)?;
        self.out.flush()?;
        self.len += record.len() as u64;
        self.unsynced += 1;

        if self.policy.sync_due(self.unsynced, self.synced_at.elapsed()) {
            self.sync()?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_data()?;
        self.unsynced = 0;
        self.synced_at = Instant::now();
        self.syncs += 1;
        Ok(())
    }

    /// Bytes in the segment.
    pub fn offset(&self) -> u64 {
        self.len
    }

    pub fn writes_since_sync(&self) -> usize {
        self.unsynced
    }

    /// fsyncs issued since open.
    pub fn syncs(&self) -> u64 {
        self.syncs
    }
}

/// Owns the directory of numbered WAL segments and the one being appended to.
///
/// A flush rotates to a fresh segment first, so the memtable being flushed
/// is covered exactly by the older segments. Those are removed with
/// [`delete_before`](Self::delete_before) only once the table holding their
/// data is durable and recorded in the manifest.
pub struct WALManager {
    dir: PathBuf,
    policy: SyncPolicy,
    active: WALWriter,
    active_id: u64,
    active_path: PathBuf,
}

impl WALManager {
    /// Start a segment numbered after every one already in `dir`. Existing
    /// segments stay for recovery to read.
    pub fn new(dir: &Path, policy: SyncPolicy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let next_id = list_numbered(dir, WAL_EXT)?
            .last()
            .map_or(1, |(id, _)| id + 1);
        Self::with_first_id(dir, policy, next_id)
    }

    pub fn with_first_id(dir: &Path, policy: SyncPolicy, id: u64) -> Result<Self> {
        let active_path = wal_path(dir, id);
        let active = WALWriter::new(&active_path, policy)?;
        sync_dir(dir)?;
        debug!(path = %active_path.display(), "opened WAL segment");
        Ok(WALManager {
            dir: dir.to_path_buf(),
            policy,
            active,
            active_id: id,
            active_path,
        })
    }

    pub fn active_writer(&mut self) -> &mut WALWriter {
        &mut self.active
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn active_id(&self) -> u64 {
        self.active_id
    }

    /// Sync the active segment and switch to the next id. Returns the
    /// finished segment's path; the file itself is kept.
    pub fn rotate(&mut self) -> Result<PathBuf> {
        self.active.sync()?;

        let id = self.active_id + 1;
        let path = wal_path(&self.dir, id);
        self.active = WALWriter::new(&path, self.policy)?;
        sync_dir(&self.dir)?;

        self.active_id = id;
        let finished = std::mem::replace(&mut self.active_path, path);
        debug!(finished = %finished.display(), active = %self.active_path.display(), "rotated WAL");
        Ok(finished)
    }

    /// Remove every segment numbered below `id`.
    pub fn delete_before(&self, id: u64) -> Result<()> {
        let mut removed = 0usize;
        for (seg_id, path) in list_numbered(&self.dir, WAL_EXT)? {
            if seg_id < id {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            sync_dir(&self.dir)?;
            debug!(below = id, removed, "deleted WAL segments");
        }
        Ok(())
    }
}
