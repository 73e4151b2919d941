//! Level 0 → level 1 compaction.
//!
//! Every compaction consumes all of level 0 plus the level 1 tables whose
//! key ranges intersect it (and, for a manual compaction, the requested
//! range). Level 1 is the bottom level, so tombstones and shadowed versions
//! are dropped on the way through: this is where deleted log entries
//! actually give their space back.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::version::Version;
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::iterator::merge::MergeIterator;
use crate::paths::sst_path;
use crate::sstable::{SSTable, SSTableBuilder, SSTableIterator};

/// Tables chosen for one compaction.
pub struct CompactionInputs {
    pub l0: Vec<Arc<SSTable>>,
    pub l1: Vec<Arc<SSTable>>,
}

impl CompactionInputs {
    pub fn is_empty(&self) -> bool {
        self.l0.is_empty() && self.l1.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<SSTable>> {
        self.l0.iter().chain(self.l1.iter())
    }
}

/// Output layout knobs.
pub struct CompactionConfig {
    pub block_size: usize,
    pub bloom_fpr: f64,
    pub target_file_size: u64,
}

/// Pick inputs. `range` is the manual compaction span `[first, last]`;
/// `None` means an automatic level 0 compaction.
///
/// The level 1 inputs are every table overlapping the hull of level 0 and
/// the range, which keeps the chosen run contiguous: outputs can never
/// overlap a level 1 table left in place.
pub fn pick(version: &Version, range: Option<(&[u8], &[u8])>) -> CompactionInputs {
    let l0_span = version.l0.iter().fold(None::<(&[u8], &[u8])>, |span, t| {
        let meta = t.meta();
        let (min, max) = (meta.min_key.as_slice(), meta.max_key.as_slice());
        Some(match span {
            None => (min, max),
            Some((lo, hi)) => (lo.min(min), hi.max(max)),
        })
    });

    let hull = match (l0_span, range) {
        (None, None) => None,
        (Some(span), None) => Some(span),
        (None, Some(range)) => Some(range),
        (Some((lo, hi)), Some((first, last))) => Some((lo.min(first), hi.max(last))),
    };

    let l1 = match hull {
        Some((first, last)) => version.l1_overlapping(first, last),
        None => Vec::new(),
    };

    CompactionInputs {
        l0: version.l0.clone(),
        l1,
    }
}

/// Merge the inputs into new level 1 tables, cut at `target_file_size`.
///
/// `next_file_id` is advanced for every output. Outputs are fsynced but not
/// yet referenced by any manifest; on error, partial outputs are removed.
pub fn run(
    dir: &Path,
    inputs: &CompactionInputs,
    config: &CompactionConfig,
    next_file_id: &mut u64,
) -> Result<Vec<Arc<SSTable>>> {
    let mut outputs = Vec::new();
    match write_outputs(dir, inputs, config, next_file_id, &mut outputs) {
        Ok(()) => Ok(outputs),
        Err(e) => {
            for table in &outputs {
                table.mark_obsolete();
            }
            Err(e)
        }
    }
}

fn write_outputs(
    dir: &Path,
    inputs: &CompactionInputs,
    config: &CompactionConfig,
    next_file_id: &mut u64,
    outputs: &mut Vec<Arc<SSTable>>,
) -> Result<()> {
    // Level 0 newest first, then level 1 (oldest); the merge gives earlier
    // sources priority.
    let mut sources: Vec<Box<dyn StorageIterator>> = Vec::new();
    for table in inputs.all() {
        sources.push(Box::new(SSTableIterator::new(Arc::clone(table))?));
    }
    let mut merged = MergeIterator::new(sources)?;

    let mut current: Option<(u64, SSTableBuilder)> = None;
    while merged.is_valid() {
        if current.is_none() {
            let id = *next_file_id;
            *next_file_id += 1;
            let builder = SSTableBuilder::new(&sst_path(dir, id), id, config.block_size)?
                .with_level(1)
                .with_bloom_fpr(config.bloom_fpr);
            current = Some((id, builder));
        }
        if let Some((_, builder)) = current.as_mut() {
            builder.add(merged.key(), merged.value_type(), merged.value())?;
            if builder.estimated_size() >= config.target_file_size {
                if let Some((id, builder)) = current.take() {
                    outputs.push(finish(dir, id, builder)?);
                }
            }
        }
        merged.next()?;
    }
    if let Some((id, builder)) = current.take() {
        outputs.push(finish(dir, id, builder)?);
    }
    Ok(())
}

fn finish(dir: &Path, id: u64, builder: SSTableBuilder) -> Result<Arc<SSTable>> {
    let path = sst_path(dir, id);
    let meta = match builder.finish() {
        Ok(meta) => meta,
        Err(e) => {
            if let Err(rm) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %rm, "failed to remove partial table");
            }
            return Err(e);
        }
    };
    debug!(id, entries = meta.entry_count, bytes = meta.file_size, "wrote compaction output");
    Ok(Arc::new(SSTable::open(&path)?))
}
