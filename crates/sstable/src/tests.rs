use super::*;
use std::sync::Arc;
use tempfile::tempdir;
use util::FakeClock;

fn sst(ts: u64, expires_at: u64, value: &[u8]) -> SstEntry {
    SstEntry {
        timestamp: ts,
        expires_at,
        value: value.to_vec(),
    }
}

#[test]
fn merge_appends_when_in_order() {
    // S1
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
    let table = SstForTag::init(dir.path().join("tag"), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();

    table.merge_with_commitlog(vec![sst(10, 0, b"a"), sst(20, 0, b"b")]).unwrap();
    table.merge_with_commitlog(vec![sst(30, 0, b"c")]).unwrap();

    let all = table.get_all_entries().unwrap();
    let ts: Vec<u64> = all.iter().map(|e| e.timestamp).collect();
    assert_eq!(ts, vec![10, 20, 30]);
}

#[test]
fn merge_resorts_on_out_of_order_arrival() {
    // S3
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
    let table = SstForTag::init(dir.path().join("tag"), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();

    table.merge_with_commitlog(vec![sst(100, 0, b"a"), sst(200, 0, b"b")]).unwrap();
    // 150 lands inside the live window: must trigger the resort path.
    table.merge_with_commitlog(vec![sst(150, 0, b"mid")]).unwrap();

    let all = table.get_all_entries().unwrap();
    let ts: Vec<u64> = all.iter().map(|e| e.timestamp).collect();
    assert_eq!(ts, vec![100, 150, 200]);
}

#[test]
fn merge_overwrites_existing_timestamp_on_resort() {
    // S4
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
    let table = SstForTag::init(dir.path().join("tag"), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();

    table.merge_with_commitlog(vec![sst(100, 0, b"old"), sst(200, 0, b"b")]).unwrap();
    table.merge_with_commitlog(vec![sst(100, 0, b"new")]).unwrap();

    let all = table.get_all_entries().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].value, b"new".to_vec());
}

#[test]
fn empty_table_always_appends_even_without_debounce_elapsed() {
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let table = SstForTag::init(dir.path().join("tag"), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
    table.merge_with_commitlog(vec![sst(5, 0, b"x")]).unwrap();
    assert_eq!(table.get_all_entries().unwrap().len(), 1);
}

#[test]
fn get_entries_with_index_matches_without_index() {
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
    let table = SstForTag::init(dir.path().join("tag"), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
    table
        .merge_with_commitlog(vec![sst(10, 0, b"a"), sst(20, 0, b"b"), sst(30, 0, b"c")])
        .unwrap();

    let indexed = table.get_entries_with_index(15, 30).unwrap();
    let unindexed = table.get_entries_without_index(15, 30).unwrap();
    assert_eq!(indexed, unindexed);
    assert_eq!(indexed.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![20, 30]);
}

#[test]
fn get_entries_skips_expired_values() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FakeClock::new(1_000));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let table = SstForTag::init(dir.path().join("tag"), DEFAULT_COMPACTION_PERIOD_MS, dyn_clock).unwrap();
    table
        .merge_with_commitlog(vec![sst(10, 500, b"expired"), sst(20, 0, b"alive")])
        .unwrap();

    let got = table.get_entries_with_index(0, 100).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].value, b"alive".to_vec());
}

#[test]
fn availability_reports_min_max_and_drops_fully_expired() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FakeClock::new(1_000));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let table = SstForTag::init(dir.path().join("tag"), DEFAULT_COMPACTION_PERIOD_MS, dyn_clock).unwrap();
    assert_eq!(table.availability(), (0, 0));

    table.merge_with_commitlog(vec![sst(10, 0, b"a"), sst(20, 2_000, b"b")]).unwrap();
    assert_eq!(table.availability(), (10, 20));

    clock.advance(1_500);
    assert_eq!(table.availability(), (10, 10));
}

#[test]
fn reopening_existing_file_rebuilds_index_by_scan() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tag");
    {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let table = SstForTag::init(&path, DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
        table.merge_with_commitlog(vec![sst(1, 0, b"a"), sst(2, 0, b"b")]).unwrap();
    }
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let reopened = SstForTag::init(&path, DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
    assert_eq!(reopened.availability(), (1, 2));
    assert_eq!(reopened.get_all_entries().unwrap().len(), 2);
}

#[test]
fn scan_and_build_index_rejects_decreasing_timestamps() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tag");
    let mut raw = Vec::new();
    raw.extend_from_slice(&sst(20, 0, b"a").encode_with_length().unwrap());
    raw.extend_from_slice(&sst(10, 0, b"b").encode_with_length().unwrap());
    std::fs::write(&path, raw).unwrap();

    let err = scan_and_build_index(&path).unwrap_err();
    assert!(matches!(err, SstError::SstCorrupt { .. }));
}

#[test]
fn manager_lazily_creates_singleton_per_tag() {
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let mgr = SstManager::init_storage(dir.path(), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
    let a = mgr.sst_for_tag(b"cpu").unwrap();
    let b = mgr.sst_for_tag(b"cpu").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn manager_try_sst_for_tag_does_not_create() {
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let mgr = SstManager::init_storage(dir.path(), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
    assert!(mgr.try_sst_for_tag(b"cpu").is_none());
    mgr.sst_for_tag(b"cpu").unwrap();
    assert!(mgr.try_sst_for_tag(b"cpu").is_some());
}

#[test]
fn manager_merge_with_commitlog_groups_by_tag_and_drops_key() {
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
    let mgr = SstManager::init_storage(dir.path(), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();

    mgr.merge_with_commitlog(&[
        codec::CommitEntry { key: b"cpu".to_vec(), timestamp: 1, expires_at: 0, value: b"a".to_vec() },
        codec::CommitEntry { key: b"mem".to_vec(), timestamp: 2, expires_at: 0, value: b"b".to_vec() },
        codec::CommitEntry { key: b"cpu".to_vec(), timestamp: 3, expires_at: 0, value: b"c".to_vec() },
    ])
    .unwrap();

    assert_eq!(mgr.get_tags().len(), 2);
    let cpu = mgr.sst_for_tag(b"cpu").unwrap();
    assert_eq!(cpu.get_all_entries().unwrap().len(), 2);
}

#[test]
fn manager_init_storage_discovers_existing_tag_files() {
    let dir = tempdir().unwrap();
    {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let mgr = SstManager::init_storage(dir.path(), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
        mgr.merge_with_commitlog(&[codec::CommitEntry {
            key: b"cpu".to_vec(),
            timestamp: 1,
            expires_at: 0,
            value: b"a".to_vec(),
        }])
        .unwrap();
    }

    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let reopened = SstManager::init_storage(dir.path(), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
    assert_eq!(reopened.get_tags().len(), 1);
    assert!(reopened.try_sst_for_tag(b"cpu").is_some());
}

#[test]
fn manager_availability_rolls_up_across_tags() {
    let dir = tempdir().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
    let mgr = SstManager::init_storage(dir.path(), DEFAULT_COMPACTION_PERIOD_MS, clock).unwrap();
    mgr.merge_with_commitlog(&[
        codec::CommitEntry { key: b"cpu".to_vec(), timestamp: 100, expires_at: 0, value: vec![] },
        codec::CommitEntry { key: b"mem".to_vec(), timestamp: 50, expires_at: 0, value: vec![] },
        codec::CommitEntry { key: b"mem".to_vec(), timestamp: 300, expires_at: 0, value: vec![] },
    ])
    .unwrap();
    assert_eq!(mgr.availability(), (50, 300));
}
