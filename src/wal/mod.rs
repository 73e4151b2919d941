pub mod reader;
pub mod record;
pub mod writer;

use std::time::Duration;

pub use record::WALRecord;

/// When an appended WAL record is forced to disk.
///
/// A consensus log must not acknowledge an entry that a crash can take
/// back, so stores open with `EveryWrite` unless configured otherwise. The
/// other policies trade a bounded loss window for throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync before every commit returns.
    #[default]
    EveryWrite,
    /// fsync once N records are pending.
    EveryNWrites(usize),
    /// fsync on the first append at least N milliseconds after the last one.
    EveryNMillis(u64),
}

impl SyncPolicy {
    pub(crate) fn sync_due(self, unsynced: usize, since_sync: Duration) -> bool {
        match self {
            SyncPolicy::EveryWrite => true,
            SyncPolicy::EveryNWrites(n) => unsynced >= n,
            SyncPolicy::EveryNMillis(ms) => since_sync >= Duration::from_millis(ms),
        }
    }
}
