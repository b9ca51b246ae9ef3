//! # MemT — per-tag in-memory table
//!
//! The fast, recent-range serving path. Each tag gets one ordered,
//! timestamp-keyed table ([`MemtForTag`]) bounded to a fixed entry count;
//! [`MemtManager`] is the per-tag registry plus the background TTL sweep
//! that keeps expired entries from lingering between writes.

use codec::CommitEntry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use util::Clock;

#[derive(Debug, Error)]
pub enum MemtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An in-memory record, ordered by `timestamp` (spec §3, §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemtEntry {
    pub timestamp: u64,
    /// `0` means "never expires".
    pub expires_at: u64,
    pub value: Vec<u8>,
}

/// One tag's bounded, timestamp-ordered in-memory table.
pub struct MemtForTag {
    map: BTreeMap<u64, MemtEntry>,
    max_entries: usize,
}

impl MemtForTag {
    pub fn new(max_entries: usize) -> Self {
        Self {
            map: BTreeMap::new(),
            max_entries,
        }
    }

    /// Inserts or replaces the entry at `timestamp`. If the table is already
    /// at `max_entries`, the smallest-timestamp entry is evicted — but only
    /// if it is strictly older than the entry being inserted; an arrival
    /// never evicts something newer than itself.
    pub fn save(&mut self, timestamp: u64, expires_at: u64, value: Vec<u8>) {
        if self.map.len() >= self.max_entries {
            if let Some((&min_ts, _)) = self.map.iter().next() {
                if min_ts < timestamp {
                    self.map.remove(&min_ts);
                    tracing::trace!(evicted = min_ts, arrival = timestamp, "memt eviction");
                }
            }
        }
        self.map.insert(
            timestamp,
            MemtEntry {
                timestamp,
                expires_at,
                value,
            },
        );
    }

    pub fn merge_with_commitlog(&mut self, entries: &[CommitEntry]) {
        for e in entries {
            self.save(e.timestamp, e.expires_at, e.value.clone());
        }
    }

    /// As [`merge_with_commitlog`](Self::merge_with_commitlog), but for
    /// prefetched `(timestamp, value)` pairs sharing one `expires_at`.
    pub fn merge_with_prefetched(&mut self, measurements: &[(u64, Vec<u8>)], expires_at: u64) {
        for (timestamp, value) in measurements {
            self.save(*timestamp, expires_at, value.clone());
        }
    }

    pub fn retrieve(&self, from_ts: u64, to_ts: u64) -> Vec<MemtEntry> {
        self.map.range(from_ts..=to_ts).map(|(_, v)| v.clone()).collect()
    }

    pub fn retrieve_all(&self) -> Vec<MemtEntry> {
        self.retrieve(0, u64::MAX - 1)
    }

    pub fn availability(&self) -> (u64, u64) {
        match (self.map.keys().next(), self.map.keys().next_back()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => (0, 0),
        }
    }

    /// Removes entries whose `expires_at` is nonzero and has passed.
    /// Returns the number of entries removed.
    pub fn perform_expiration(&mut self, now_millis: u64) -> usize {
        let expired: Vec<u64> = self
            .map
            .iter()
            .filter(|(_, e)| e.expires_at != 0 && e.expires_at < now_millis)
            .map(|(&ts, _)| ts)
            .collect();
        for ts in &expired {
            self.map.remove(ts);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Registry of [`MemtForTag`] plus the background expiration sweep (spec
/// §4.7).
pub struct MemtManager {
    registry: Mutex<HashMap<Vec<u8>, Arc<Mutex<MemtForTag>>>>,
    max_entries_per_tag: usize,
    clock: Arc<dyn Clock>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemtManager {
    /// Default per spec §4.7 / §6: 10 entries per tag.
    pub const DEFAULT_MAX_ENTRIES_PER_TAG: usize = 10;
    /// Default per spec §4.7 / §6: sweep every 10 seconds.
    pub const DEFAULT_PERFORM_EXPIRATION_EVERY: Duration = Duration::from_secs(10);

    pub fn init_storage(
        max_entries_per_tag: usize,
        perform_expiration_every: Duration,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry: Mutex::new(HashMap::new()),
            max_entries_per_tag,
            clock,
            stop_tx: Mutex::new(None),
            worker: Mutex::new(None),
        });

        let (tx, rx) = mpsc::channel::<()>();
        let worker_manager = Arc::clone(&manager);
        let handle = std::thread::spawn(move || loop {
            match rx.recv_timeout(perform_expiration_every) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    worker_manager.sweep_all();
                }
            }
        });

        *manager.stop_tx.lock().expect("stop_tx lock poisoned") = Some(tx);
        *manager.worker.lock().expect("worker lock poisoned") = Some(handle);
        manager
    }

    fn sweep_all(&self) {
        let now = self.clock.now_millis();
        let tags: Vec<Arc<Mutex<MemtForTag>>> = self
            .registry
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut total = 0;
        for memt in tags {
            let mut guard = memt.lock().expect("memt lock poisoned");
            total += guard.perform_expiration(now);
        }
        if total > 0 {
            tracing::debug!(expired = total, "memt expiration sweep");
        }
    }

    /// Stops the background expiration loop on its next sleep boundary and
    /// joins the thread.
    pub fn close_storage(&self) {
        if let Some(tx) = self.stop_tx.lock().expect("stop_tx lock poisoned").take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.worker.lock().expect("worker lock poisoned").take() {
            let _ = handle.join();
        }
    }

    /// Looks up (or lazily creates) the table for `tag`. Lookup-or-insert is
    /// one atomic critical section under the registry lock, so two
    /// concurrent callers for the same unseen tag can never construct two
    /// distinct tables.
    pub fn memtable_for_tag(&self, tag: &[u8]) -> Arc<Mutex<MemtForTag>> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        registry
            .entry(tag.to_vec())
            .or_insert_with(|| Arc::new(Mutex::new(MemtForTag::new(self.max_entries_per_tag))))
            .clone()
    }

    pub fn merge_with_commitlog_for_tag(&self, tag: &[u8], entries: &[CommitEntry]) {
        let memt = self.memtable_for_tag(tag);
        memt.lock().expect("memt lock poisoned").merge_with_commitlog(entries);
    }

    pub fn merge_with_prefetched(&self, tag: &[u8], measurements: &[(u64, Vec<u8>)], expires_at: u64) {
        let memt = self.memtable_for_tag(tag);
        memt.lock()
            .expect("memt lock poisoned")
            .merge_with_prefetched(measurements, expires_at);
    }

    /// Groups `entries` by tag and merges each group, one worker thread per
    /// tag, joined before returning.
    pub fn merge_with_commitlog(&self, entries: &[CommitEntry]) {
        let mut by_tag: HashMap<Vec<u8>, Vec<CommitEntry>> = HashMap::new();
        for e in entries {
            by_tag.entry(e.key.clone()).or_default().push(e.clone());
        }
        std::thread::scope(|scope| {
            for (tag, batch) in &by_tag {
                scope.spawn(move || self.merge_with_commitlog_for_tag(tag, batch));
            }
        });
    }

    pub fn availability(&self) -> (u64, u64) {
        let registry = self.registry.lock().expect("registry lock poisoned");
        let mut min = 0u64;
        let mut max = 0u64;
        for memt in registry.values() {
            let (lo, hi) = memt.lock().expect("memt lock poisoned").availability();
            if lo == 0 && hi == 0 {
                continue;
            }
            if min == 0 || lo < min {
                min = lo;
            }
            if hi > max {
                max = hi;
            }
        }
        (min, max)
    }

    pub fn get_tags(&self) -> Vec<Vec<u8>> {
        self.registry.lock().expect("registry lock poisoned").keys().cloned().collect()
    }
}

impl Drop for MemtManager {
    fn drop(&mut self) {
        self.close_storage();
    }
}

#[cfg(test)]
mod tests;
