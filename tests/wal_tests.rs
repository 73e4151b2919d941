// WAL tests
// Record encoding, crash-tolerant reading, sync policies and segment
// rotation.

use std::fs::{self, OpenOptions};
use std::io::Write;

use raft_logdb::error::Error;
use raft_logdb::types::{Mutation, ValueType};
use raft_logdb::wal::reader::WALReader;
use raft_logdb::wal::writer::{WALManager, WALWriter};
use raft_logdb::wal::{SyncPolicy, WALRecord};

fn entry(i: usize) -> WALRecord {
    WALRecord::put(format!("log/{i:08}").into_bytes(), format!("entry-{i}").into_bytes())
}

fn batch(ops: usize, tag: &str) -> Vec<Mutation> {
    (0..ops)
        .map(|i| Mutation::put(format!("{tag}/{i}").into_bytes(), vec![i as u8; i]))
        .collect()
}

// =============================================================================
// Test 1: One record carries a whole batch, puts and deletes in order
// =============================================================================
#[test]
fn batch_record_round_trip() {
    let ops = vec![
        Mutation::put(b"k1".to_vec(), b"v1".to_vec()),
        Mutation::delete(b"k0".to_vec()),
        Mutation::put(b"k2".to_vec(), Vec::new()),
    ];
    let record = WALRecord { ops: ops.clone() };
    let encoded = record.encode();
    assert_eq!(encoded.len(), record.encoded_size());

    let decoded = WALRecord::decode(&encoded).unwrap();
    assert_eq!(decoded.ops, ops);
    assert_eq!(decoded.ops[1].value_type, ValueType::Delete);
}

// =============================================================================
// Test 2: Any flipped bit fails the CRC
// =============================================================================
#[test]
fn corrupted_record_rejected() {
    let encoded = entry(7).encode();
    for pos in [4, 8, 12, encoded.len() - 1] {
        let mut bad = encoded.clone();
        bad[pos] ^= 0x01;
        assert!(
            matches!(WALRecord::decode(&bad), Err(Error::Corruption(_))),
            "flip at {pos} not detected"
        );
    }
}

// =============================================================================
// Test 3: Written records read back in order
// =============================================================================
#[test]
fn write_then_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000001.wal");
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        for i in 0..100 {
            writer.append(&entry(i)).unwrap();
        }
        assert_eq!(writer.offset(), fs::metadata(&path).unwrap().len());
    }

    let reader = WALReader::open(&path).unwrap();
    let records: Vec<WALRecord> = reader.records().collect();
    assert_eq!(records.len(), 100);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record, &entry(i));
    }
}

// =============================================================================
// Test 4: Reader stops at a torn tail; earlier records survive
// =============================================================================
#[test]
fn torn_tail_stops_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000001.wal");
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        writer.append_batch(&batch(3, "first")).unwrap();
        writer.append_batch(&batch(5, "second")).unwrap();
    }
    let full = fs::metadata(&path).unwrap().len();
    OpenOptions::new().write(true).open(&path).unwrap().set_len(full - 1).unwrap();

    let reader = WALReader::open(&path).unwrap();
    let mut iter = reader.records();
    let records: Vec<WALRecord> = iter.by_ref().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ops, batch(3, "first"));
    assert!(iter.torn_bytes() > 0);
    assert!(iter.torn_bytes() < reader.len());
}

// =============================================================================
// Test 5: Garbage appended after valid records is ignored
// =============================================================================
#[test]
fn garbage_after_records_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000001.wal");
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        writer.append(&entry(0)).unwrap();
        writer.append(&entry(1)).unwrap();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 37]).unwrap();

    let reader = WALReader::open(&path).unwrap();
    assert_eq!(reader.records().count(), 2);
}

// =============================================================================
// Test 6: Reopening a writer appends after existing records
// =============================================================================
#[test]
fn reopen_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000001.wal");
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        writer.append(&entry(0)).unwrap();
    }
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        assert!(writer.offset() > 0);
        writer.append(&entry(1)).unwrap();
    }
    assert_eq!(WALReader::open(&path).unwrap().records().count(), 2);
}

// =============================================================================
// Test 7: EveryWrite syncs after each append
// =============================================================================
#[test]
fn every_write_policy() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = WALWriter::new(&dir.path().join("w.wal"), SyncPolicy::EveryWrite).unwrap();
    for i in 0..3 {
        writer.append(&entry(i)).unwrap();
        assert_eq!(writer.writes_since_sync(), 0);
    }
    assert_eq!(writer.syncs(), 3);
}

// =============================================================================
// Test 8: EveryNWrites(3) syncs on every third append
// =============================================================================
#[test]
fn every_n_writes_policy() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer =
        WALWriter::new(&dir.path().join("w.wal"), SyncPolicy::EveryNWrites(3)).unwrap();

    let mut pending = Vec::new();
    for i in 0..7 {
        writer.append(&entry(i)).unwrap();
        pending.push(writer.writes_since_sync());
    }
    assert_eq!(pending, vec![1, 2, 0, 1, 2, 0, 1]);
    assert_eq!(writer.syncs(), 2);

    writer.sync().unwrap();
    assert_eq!(writer.writes_since_sync(), 0);
}

// =============================================================================
// Test 9: EveryNMillis syncs once the interval has passed
// =============================================================================
#[test]
fn every_n_millis_policy() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer =
        WALWriter::new(&dir.path().join("w.wal"), SyncPolicy::EveryNMillis(50)).unwrap();

    writer.append(&entry(0)).unwrap();
    assert_eq!(writer.writes_since_sync(), 1);

    std::thread::sleep(std::time::Duration::from_millis(60));
    writer.append(&entry(1)).unwrap();
    assert_eq!(writer.writes_since_sync(), 0);
}

// =============================================================================
// Test 10: Rotation starts a new numbered segment, old one kept
// =============================================================================
#[test]
fn rotate_creates_next_segment() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = WALManager::new(dir.path(), SyncPolicy::EveryWrite).unwrap();
    assert_eq!(manager.active_id(), 1);

    manager.active_writer().append(&entry(0)).unwrap();
    let old = manager.rotate().unwrap();
    manager.active_writer().append(&entry(1)).unwrap();

    assert!(old.exists());
    assert_eq!(manager.active_id(), 2);
    assert!(manager.active_path().ends_with("000002.wal"));

    let old_records: Vec<WALRecord> =
        WALReader::open(&old).unwrap().records().collect();
    assert_eq!(old_records, vec![entry(0)]);
    let new_records: Vec<WALRecord> = WALReader::open(manager.active_path())
        .unwrap()
        .records()
        .collect();
    assert_eq!(new_records, vec![entry(1)]);
}

// =============================================================================
// Test 11: delete_before removes only older segments
// =============================================================================
#[test]
fn delete_before_keeps_active() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = WALManager::new(dir.path(), SyncPolicy::EveryWrite).unwrap();
    let first = manager.rotate().unwrap();
    let second = manager.rotate().unwrap();

    manager.delete_before(manager.active_id()).unwrap();

    assert!(!first.exists());
    assert!(!second.exists());
    assert!(manager.active_path().exists());
}

// =============================================================================
// Test 12: New manager continues numbering after existing segments
// =============================================================================
#[test]
fn manager_resumes_numbering() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut manager = WALManager::new(dir.path(), SyncPolicy::EveryWrite).unwrap();
        manager.rotate().unwrap();
        manager.rotate().unwrap();
        assert_eq!(manager.active_id(), 3);
    }
    let manager = WALManager::new(dir.path(), SyncPolicy::EveryWrite).unwrap();
    assert_eq!(manager.active_id(), 4);

    let pinned = WALManager::with_first_id(dir.path(), SyncPolicy::EveryWrite, 10).unwrap();
    assert!(pinned.active_path().ends_with("000010.wal"));
}
