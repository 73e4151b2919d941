//! # raft-logdb
//!
//! Durable storage for a replicated log: an ordered key-value contract
//! ([`KvStore`]) with atomic write batches, bounded range scans, range
//! deletion for log truncation and a compaction trigger, backed by a small
//! LSM-tree engine.
//!
//! ## Core idea
//! Writes go to a write-ahead log (one record per batch, fsynced) and an
//! in-memory skiplist. Full memtables are flushed as sorted tables, and
//! compaction merges them into a single non-overlapping run, dropping the
//! entries that truncation deleted.
//!
//! ```no_run
//! use raft_logdb::{KvStore, WriteBatch, new_kv_store};
//!
//! # fn main() -> raft_logdb::Result<()> {
//! let store = new_kv_store("/var/lib/raft/log", "")?;
//! let mut batch = store.get_write_batch(None);
//! batch.put(b"log/1", b"entry one");
//! batch.put(b"log/2", b"entry two");
//! store.commit_write_batch(&batch)?;
//!
//! store.remove_entries(b"log/1", b"log/2")?;
//! store.compaction(b"log/1", b"log/2")?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod bloom;
pub mod compaction;
pub mod db;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod paths;
pub mod sstable;
pub mod store;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use batch::{BatchContext, BatchSlot, LsmWriteBatch, PooledBatch, WriteBatch};
pub use db::{DB, Options, Stats};
pub use error::{Error, Result};
pub use store::{DefaultKvStore, KvStore, LsmStore, new_kv_store};
pub use wal::SyncPolicy;
