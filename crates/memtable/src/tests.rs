use super::*;
use std::sync::Arc;
use std::time::Duration;
use util::FakeClock;

fn commit(key: &[u8], ts: u64, expires_at: u64, value: &[u8]) -> CommitEntry {
    CommitEntry {
        key: key.to_vec(),
        timestamp: ts,
        expires_at,
        value: value.to_vec(),
    }
}

#[test]
fn save_inserts_when_under_capacity() {
    let mut t = MemtForTag::new(10);
    t.save(1, 0, b"a".to_vec());
    t.save(2, 0, b"b".to_vec());
    assert_eq!(t.len(), 2);
    assert_eq!(t.availability(), (1, 2));
}

#[test]
fn save_overwrites_equal_timestamp() {
    let mut t = MemtForTag::new(10);
    t.save(5, 0, b"old".to_vec());
    t.save(5, 0, b"new".to_vec());
    assert_eq!(t.len(), 1);
    assert_eq!(t.retrieve(5, 5)[0].value, b"new".to_vec());
}

#[test]
fn bounded_size_evicts_smallest_when_strictly_older() {
    // S5
    let mut zero = MemtForTag::new(2);
    zero.save(1337, 0, vec![]);
    zero.save(1341, 0, vec![]);
    zero.save(1345, 0, vec![]);
    assert_eq!(zero.len(), 2);
    let ts: Vec<u64> = zero.retrieve_all().iter().map(|e| e.timestamp).collect();
    assert_eq!(ts, vec![1341, 1345]);

    let mut one = MemtForTag::new(2);
    one.save(1339, 0, vec![]);
    one.save(1343, 0, vec![]);
    assert_eq!(one.len(), 2);
}

#[test]
fn bounded_size_never_evicts_something_newer_than_arrival() {
    let mut t = MemtForTag::new(1);
    t.save(100, 0, vec![]);
    // Arrival older than current contents: current (100) is not < 50, so no eviction,
    // and the insert makes the table temporarily "over" capacity by the letter of the
    // rule, which is acceptable since 100 is not evicted.
    t.save(50, 0, vec![]);
    assert!(t.retrieve(100, 100).len() == 1 || t.retrieve(50, 50).len() == 1);
}

#[test]
fn retrieve_range_is_inclusive_of_to() {
    let mut t = MemtForTag::new(10);
    for ts in [10, 20, 30] {
        t.save(ts, 0, vec![ts as u8]);
    }
    let got: Vec<u64> = t.retrieve(10, 20).iter().map(|e| e.timestamp).collect();
    assert_eq!(got, vec![10, 20]);
}

#[test]
fn availability_empty_is_zero_zero() {
    let t = MemtForTag::new(10);
    assert_eq!(t.availability(), (0, 0));
}

#[test]
fn perform_expiration_removes_only_expired() {
    let mut t = MemtForTag::new(10);
    t.save(1, 500, vec![]);
    t.save(2, 0, vec![]);
    t.save(3, 1000, vec![]);
    let removed = t.perform_expiration(600);
    assert_eq!(removed, 1);
    let remaining: Vec<u64> = t.retrieve_all().iter().map(|e| e.timestamp).collect();
    assert_eq!(remaining, vec![2, 3]);
}

#[test]
fn merge_with_commitlog_applies_each_entry() {
    let mut t = MemtForTag::new(10);
    t.merge_with_commitlog(&[commit(b"cpu", 1, 0, b"a"), commit(b"cpu", 2, 0, b"b")]);
    assert_eq!(t.len(), 2);
}

#[test]
fn manager_lazily_creates_singleton_per_tag() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let mgr = MemtManager::init_storage(10, Duration::from_secs(3600), clock);
    let a = mgr.memtable_for_tag(b"cpu");
    let b = mgr.memtable_for_tag(b"cpu");
    assert!(Arc::ptr_eq(&a, &b));
    mgr.close_storage();
}

#[test]
fn manager_merge_with_commitlog_groups_by_tag() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let mgr = MemtManager::init_storage(10, Duration::from_secs(3600), clock);
    mgr.merge_with_commitlog(&[
        commit(b"cpu", 1337, 0, vec![0, 0, 0, 0].as_slice()),
        commit(b"mem", 1339, 0, vec![1].as_slice()),
        commit(b"cpu", 1341, 0, vec![0, 0, 0, 0].as_slice()),
    ]);
    assert_eq!(mgr.get_tags().len(), 2);
    assert_eq!(mgr.memtable_for_tag(b"cpu").lock().unwrap().len(), 2);
    mgr.close_storage();
}

#[test]
fn manager_availability_rolls_up_nonzero_tags() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let mgr = MemtManager::init_storage(10, Duration::from_secs(3600), clock);
    mgr.merge_with_commitlog_for_tag(b"cpu", &[commit(b"cpu", 1337, 0, b""), commit(b"cpu", 1361, 0, b"")]);
    mgr.merge_with_commitlog_for_tag(b"mem", &[commit(b"mem", 1300, 0, b"")]);
    assert_eq!(mgr.availability(), (1300, 1361));
    mgr.close_storage();
}

#[test]
fn manager_background_sweep_removes_expired_entries() {
    // S6, using a short real interval as the spec calls for.
    let fake = FakeClock::new(1_000_000);
    let clock: Arc<dyn Clock> = Arc::new(fake.clone());
    let mgr = MemtManager::init_storage(10, Duration::from_millis(150), clock);
    mgr.merge_with_commitlog_for_tag(
        b"tagZero",
        &[
            commit(b"tagZero", 1347, 1_000_000 + 400, b""),
            commit(b"tagZero", 1345, 1_000_000 + 3_000, b""),
        ],
    );

    fake.advance(1_000);
    std::thread::sleep(Duration::from_millis(400));

    let memt = mgr.memtable_for_tag(b"tagZero");
    let remaining: Vec<u64> = memt.lock().unwrap().retrieve_all().iter().map(|e| e.timestamp).collect();
    assert_eq!(remaining, vec![1345]);

    mgr.close_storage();
}

#[test]
fn manager_close_storage_stops_background_thread() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
    let mgr = MemtManager::init_storage(10, Duration::from_millis(50), clock);
    mgr.close_storage();
    // A second close is a harmless no-op.
    mgr.close_storage();
}
