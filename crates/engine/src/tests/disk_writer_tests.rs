use std::sync::Arc;
use std::time::Duration;

use codec::CommitEntry;
use tempfile::TempDir;
use util::{Clock, FakeClock};

use crate::DiskWriter;

fn entry(key: &[u8], ts: u64) -> CommitEntry {
    CommitEntry { key: key.to_vec(), timestamp: ts, expires_at: 0, value: vec![ts as u8] }
}

#[test]
fn store_multiple_flushes_once_threshold_is_reached() {
    let dir = TempDir::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let dw = DiskWriter::init_storage(
        dir.path().join("cl"),
        dir.path().join("sst"),
        3,
        Duration::from_secs(3600),
        sstable::DEFAULT_COMPACTION_PERIOD_MS,
        clock,
    )
    .unwrap();

    dw.store_multiple(&[entry(b"cpu", 1), entry(b"cpu", 2), entry(b"cpu", 3)]).unwrap();

    let sst = dw.sst_manager().sst_for_tag(b"cpu").unwrap();
    assert_eq!(sst.get_all_entries().unwrap().len(), 3);
    dw.close_storage();
}

#[test]
fn store_below_threshold_stays_in_commit_log_only() {
    let dir = TempDir::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let dw = DiskWriter::init_storage(
        dir.path().join("cl"),
        dir.path().join("sst"),
        100,
        Duration::from_secs(3600),
        sstable::DEFAULT_COMPACTION_PERIOD_MS,
        clock,
    )
    .unwrap();

    dw.store_multiple(&[entry(b"cpu", 1)]).unwrap();
    assert!(dw.sst_manager().try_sst_for_tag(b"cpu").is_none());
    dw.close_storage();
}

#[test]
fn close_storage_stops_flush_timer() {
    let dir = TempDir::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let dw = DiskWriter::init_storage(
        dir.path().join("cl"),
        dir.path().join("sst"),
        100,
        Duration::from_millis(30),
        sstable::DEFAULT_COMPACTION_PERIOD_MS,
        clock,
    )
    .unwrap();
    dw.close_storage();
    dw.close_storage();
}
