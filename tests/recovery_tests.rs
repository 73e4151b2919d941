// Recovery tests
// Reopening a store: WAL replay, torn WAL tails, manifest reload, directory
// locking, separate WAL directory, and disk space given back by compaction.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use raft_logdb::sstable::footer::Footer;
use raft_logdb::{Error, KvStore, LsmStore, LsmWriteBatch, Options, WriteBatch, new_kv_store};
use tempfile::tempdir;

fn read(store: &LsmStore, key: &[u8]) -> Option<Vec<u8>> {
    let mut out = None;
    store
        .get_value(key, |v| {
            out = v.map(|v| v.to_vec());
            Ok(())
        })
        .unwrap();
    out
}

fn count(store: &LsmStore, first: &[u8], last: &[u8]) -> usize {
    let mut n = 0;
    store
        .iterate_value(first, last, true, |_, _| {
            n += 1;
            Ok(true)
        })
        .unwrap();
    n
}

fn files_with_ext(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}

fn log_key(i: u32) -> Vec<u8> {
    format!("log/{i:08}").into_bytes()
}

fn small_options(dir: &Path) -> Options {
    Options::new(dir)
        .with_memtable_size(4 * 1024)
        .with_block_size(512)
        .with_l0_compaction_trigger(3)
        .with_target_file_size(8 * 1024)
}

// =============================================================================
// Test 1: Unflushed writes survive a reopen via WAL replay
// =============================================================================
#[test]
fn wal_replay_on_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = new_kv_store(dir.path(), "").unwrap();
        store.save_value(b"term", b"3").unwrap();
        store.save_value(b"log/1", b"A").unwrap();
        store.delete_value(b"term").unwrap();
        store.save_value(b"log/2", b"B").unwrap();
        assert_eq!(store.stats().flushes, 0);
    }

    let store = new_kv_store(dir.path(), "").unwrap();
    assert_eq!(read(&store, b"term"), None);
    assert_eq!(read(&store, b"log/1"), Some(b"A".to_vec()));
    assert_eq!(read(&store, b"log/2"), Some(b"B".to_vec()));
}

// =============================================================================
// Test 2: A torn batch at the WAL tail is dropped as a whole
// =============================================================================
#[test]
fn torn_batch_is_all_or_nothing() {
    let dir = tempdir().unwrap();
    {
        let store = new_kv_store(dir.path(), "").unwrap();
        let mut batch = LsmWriteBatch::new();
        batch.put(b"a1", b"x");
        batch.put(b"a2", b"x");
        store.commit_write_batch(&batch).unwrap();

        batch.clear();
        batch.put(b"b1", b"y");
        batch.put(b"b2", b"y");
        batch.put(b"b3", b"y");
        store.commit_write_batch(&batch).unwrap();
        store.close().unwrap();
    }

    // Cut the last record short, as if the process died mid-write.
    let wal = files_with_ext(dir.path(), "wal")
        .into_iter()
        .filter(|p| fs::metadata(p).unwrap().len() > 0)
        .next_back()
        .unwrap();
    let len = fs::metadata(&wal).unwrap().len();
    OpenOptions::new().write(true).open(&wal).unwrap().set_len(len - 5).unwrap();

    let store = new_kv_store(dir.path(), "").unwrap();
    assert_eq!(read(&store, b"a1"), Some(b"x".to_vec()));
    assert_eq!(read(&store, b"a2"), Some(b"x".to_vec()));
    assert_eq!(count(&store, b"b", b"c"), 0);
}

// =============================================================================
// Test 3: Flushed and compacted state reloads from the manifest
// =============================================================================
#[test]
fn tables_reload_after_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = LsmStore::open_with_options(small_options(dir.path())).unwrap();
        for i in 0..1000 {
            store.save_value(&log_key(i), format!("e{i}").as_bytes()).unwrap();
        }
        store.remove_entries(&log_key(0), &log_key(250)).unwrap();
        let stats = store.stats();
        assert!(stats.flushes > 0 && stats.compactions > 0, "{stats:?}");
    }

    let store = LsmStore::open_with_options(small_options(dir.path())).unwrap();
    assert_eq!(count(&store, &log_key(0), &log_key(999)), 750);
    assert_eq!(read(&store, &log_key(100)), None);
    assert_eq!(read(&store, &log_key(600)), Some(b"e600".to_vec()));
    assert!(store.stats().l0_tables + store.stats().l1_tables > 0);
}

// =============================================================================
// Test 4: Second handle on the same directory is refused
// =============================================================================
#[test]
fn directory_lock_is_exclusive() {
    let dir = tempdir().unwrap();
    let first = new_kv_store(dir.path(), "").unwrap();

    match new_kv_store(dir.path(), "") {
        Err(Error::Open { path, .. }) => assert_eq!(path, dir.path()),
        Err(e) => panic!("expected Open error, got {e}"),
        Ok(_) => panic!("second open should fail while the first is live"),
    }

    first.close().unwrap();
    let second = new_kv_store(dir.path(), "").unwrap();
    second.save_value(b"k", b"v").unwrap();
}

// =============================================================================
// Test 5: Open fails on an unusable path
// =============================================================================
#[test]
fn open_on_file_path_fails() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    fs::write(&file, b"x").unwrap();

    assert!(matches!(new_kv_store(&file, ""), Err(Error::Open { .. })));
}

// =============================================================================
// Test 6: WAL segments live in the separate WAL directory
// =============================================================================
#[test]
fn separate_wal_dir() {
    let data = tempdir().unwrap();
    let wal = tempdir().unwrap();
    {
        let store = new_kv_store(data.path(), wal.path()).unwrap();
        store.save_value(b"k", b"v").unwrap();
        assert!(files_with_ext(data.path(), "wal").is_empty());
        assert!(!files_with_ext(wal.path(), "wal").is_empty());
    }

    let store = new_kv_store(data.path(), wal.path()).unwrap();
    assert_eq!(read(&store, b"k"), Some(b"v".to_vec()));
}

// =============================================================================
// Test 7: Flushed WAL segments are deleted
// =============================================================================
#[test]
fn flush_retires_wal_segments() {
    let dir = tempdir().unwrap();
    let store = new_kv_store(dir.path(), "").unwrap();
    for i in 0..10 {
        store.save_value(&log_key(i), b"v").unwrap();
    }
    store.flush().unwrap();
    store.save_value(b"after", b"flush").unwrap();
    store.flush().unwrap();

    let wals = files_with_ext(dir.path(), "wal");
    assert_eq!(wals.len(), 1, "only the active segment should remain: {wals:?}");
    assert_eq!(fs::metadata(&wals[0]).unwrap().len(), 0);
    assert_eq!(files_with_ext(dir.path(), "sst").len(), 2);
}

// =============================================================================
// Test 8: Compaction gives back the space of removed entries
// =============================================================================
#[test]
fn compaction_reclaims_space() {
    let dir = tempdir().unwrap();
    let store = LsmStore::open_with_options(small_options(dir.path())).unwrap();
    for i in 0..500 {
        store.save_value(&log_key(i), &[1u8; 100]).unwrap();
    }
    store.flush().unwrap();
    let sst_bytes = |dir: &Path| -> u64 {
        files_with_ext(dir, "sst")
            .iter()
            .map(|p| fs::metadata(p).unwrap().len())
            .sum()
    };
    let before = sst_bytes(dir.path());
    assert!(before > 50_000);

    store.remove_entries(&log_key(0), &log_key(450)).unwrap();
    store.compaction(&log_key(0), &log_key(450)).unwrap();

    let after = sst_bytes(dir.path());
    assert!(after < before / 4, "before {before}, after {after}");
    assert_eq!(count(&store, &log_key(0), &log_key(499)), 50);
}

// =============================================================================
// Test 9: Leftover table files unknown to the manifest are removed
// =============================================================================
#[test]
fn orphaned_tables_removed_on_open() {
    let dir = tempdir().unwrap();
    {
        let store = new_kv_store(dir.path(), "").unwrap();
        store.save_value(b"k", b"v").unwrap();
        store.flush().unwrap();
    }
    let orphan = dir.path().join("000999.sst");
    fs::write(&orphan, b"half-written table").unwrap();

    let store = new_kv_store(dir.path(), "").unwrap();
    assert!(!orphan.exists());
    assert_eq!(read(&store, b"k"), Some(b"v".to_vec()));
}

// =============================================================================
// Test 10: A corrupt data block mid-scan aborts the scan as fatal
// =============================================================================
#[test]
fn corrupt_block_is_fatal_mid_scan() {
    let dir = tempdir().unwrap();
    {
        let store = LsmStore::open_with_options(
            Options::new(dir.path()).with_block_size(512),
        )
        .unwrap();
        for i in 0..400 {
            store.save_value(&log_key(i), &[9u8; 40]).unwrap();
        }
        store.flush().unwrap();
    }

    let sst = files_with_ext(dir.path(), "sst").pop().unwrap();
    let mut file = OpenOptions::new().write(true).open(&sst).unwrap();
    file.seek(SeekFrom::Start(4000)).unwrap();
    file.write_all(&[0xFF; 16]).unwrap();
    file.sync_all().unwrap();

    let store = new_kv_store(dir.path(), "").unwrap();
    let mut visited = 0;
    let err = store
        .iterate_value(&log_key(0), &log_key(400), false, |_, _| {
            visited += 1;
            Ok(true)
        })
        .unwrap_err();
    assert!(err.is_fatal(), "expected fatal iteration error, got {err}");
    assert!(visited > 0 && visited < 400);
}

// =============================================================================
// Test 11: After the WAL fails, mutations are refused until reopen
// =============================================================================
#[test]
fn wal_failure_refuses_writes_until_reopen() {
    let dir = tempdir().unwrap();
    let store = new_kv_store(dir.path(), "").unwrap();
    for i in 0..10 {
        store.save_value(&log_key(i), b"v").unwrap();
    }

    // Occupy the next segment's name so rotation cannot create it
    let active = files_with_ext(dir.path(), "wal").pop().unwrap();
    let id: u64 = active.file_stem().unwrap().to_str().unwrap().parse().unwrap();
    let blocker = dir.path().join(format!("{:06}.wal", id + 1));
    fs::create_dir(&blocker).unwrap();

    assert!(matches!(store.flush(), Err(Error::Write(_))));

    let wal_failed = |e: &Error| match e {
        Error::Write(inner) | Error::Commit(inner) | Error::Compaction(inner) => {
            matches!(**inner, Error::WalFailed(_))
        }
        _ => false,
    };
    let err = store.save_value(b"late", b"v").unwrap_err();
    assert!(matches!(err, Error::Write(_)) && wal_failed(&err), "{err}");
    let err = store.delete_value(&log_key(0)).unwrap_err();
    assert!(wal_failed(&err), "{err}");

    let mut batch = LsmWriteBatch::new();
    batch.put(b"late", b"v");
    let err = store.commit_write_batch(&batch).unwrap_err();
    assert!(matches!(err, Error::Commit(_)) && wal_failed(&err), "{err}");
    let err = store.compaction(b"a", b"z").unwrap_err();
    assert!(matches!(err, Error::Compaction(_)) && wal_failed(&err), "{err}");

    // Acknowledged data is still readable
    assert_eq!(read(&store, &log_key(3)), Some(b"v".to_vec()));
    assert_eq!(count(&store, &log_key(0), &log_key(9)), 10);
    store.close().unwrap();

    fs::remove_dir(&blocker).unwrap();
    let store = new_kv_store(dir.path(), "").unwrap();
    assert_eq!(count(&store, &log_key(0), &log_key(9)), 10);
    assert_eq!(read(&store, b"late"), None);
    store.save_value(b"late", b"v").unwrap();
    assert_eq!(read(&store, b"late"), Some(b"v".to_vec()));
}

// =============================================================================
// Test 12: A table whose index points outside the file fails open cleanly
// =============================================================================
#[test]
fn corrupt_table_index_fails_open() {
    let dir = tempdir().unwrap();
    {
        let store = new_kv_store(dir.path(), "").unwrap();
        for i in 0..50 {
            store.save_value(&log_key(i), b"v").unwrap();
        }
        store.flush().unwrap();
    }

    let sst = files_with_ext(dir.path(), "sst").pop().unwrap();
    let mut data = fs::read(&sst).unwrap();
    // Footer: [index offset u64][index size u64]...; the index block ends in
    // a crc32, so damaging it must be caught at open.
    let footer_at = data.len() - Footer::SIZE;
    let index_at = u64::from_le_bytes(data[footer_at..footer_at + 8].try_into().unwrap()) as usize;
    data[index_at + 4] ^= 0xFF;
    fs::write(&sst, &data).unwrap();

    match new_kv_store(dir.path(), "") {
        Err(Error::Open { source, .. }) => assert!(matches!(*source, Error::Corruption(_))),
        Err(other) => panic!("expected Open error, got {other}"),
        Ok(_) => panic!("corrupt table opened"),
    }
}

// =============================================================================
// Test 13: A corrupt first block is fatal even before the first visit
// =============================================================================
#[test]
fn corrupt_first_block_is_fatal_at_scan_start() {
    let dir = tempdir().unwrap();
    {
        let store = LsmStore::open_with_options(
            Options::new(dir.path()).with_block_size(512),
        )
        .unwrap();
        for i in 0..400 {
            store.save_value(&log_key(i), &[9u8; 40]).unwrap();
        }
        store.flush().unwrap();
    }

    let sst = files_with_ext(dir.path(), "sst").pop().unwrap();
    let mut file = OpenOptions::new().write(true).open(&sst).unwrap();
    file.seek(SeekFrom::Start(20)).unwrap();
    file.write_all(&[0xFF; 8]).unwrap();
    file.sync_all().unwrap();

    let store = new_kv_store(dir.path(), "").unwrap();
    let mut visited = 0;
    let err = store
        .iterate_value(&log_key(0), &log_key(400), false, |_, _| {
            visited += 1;
            Ok(true)
        })
        .unwrap_err();
    assert!(err.is_fatal(), "expected fatal iteration error, got {err}");
    assert_eq!(visited, 0);

    // Point reads of the same block still report a read failure
    let err = store.get_value(&log_key(0), |_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::Read(_)), "{err}");
}
