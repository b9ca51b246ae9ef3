//! Read-side merge of the in-memory table and the on-disk table, plus the
//! startup prefetch that warms the MemT from recent SST data (spec §4.10).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use memtable::MemtManager;
use sstable::SstManager;
use util::Clock;

use crate::{max_nonzero, min_nonzero, EngineError, Measurement};

pub struct StorageReader {
    memt: Arc<MemtManager>,
    sst: Arc<SstManager>,
}

impl StorageReader {
    /// If the SST manager already has tags and `memt_prefetch_seconds > 0`,
    /// warms the MemT from the most recent slice of each tag's SST data
    /// before returning.
    pub fn init(
        memt: Arc<MemtManager>,
        sst: Arc<SstManager>,
        memt_prefetch_seconds: u64,
        perform_expiration_every: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, EngineError> {
        let reader = Arc::new(Self { memt, sst });
        if memt_prefetch_seconds > 0 && !reader.sst.get_tags().is_empty() {
            reader.prefetch(memt_prefetch_seconds, perform_expiration_every, clock.as_ref())?;
        }
        Ok(reader)
    }

    fn prefetch(&self, memt_prefetch_seconds: u64, perform_expiration_every: Duration, clock: &dyn Clock) -> Result<(), EngineError> {
        let (avail_from, avail_to) = self.sst.availability();
        if avail_from == 0 && avail_to == 0 {
            return Ok(());
        }
        let span_ms = memt_prefetch_seconds.saturating_mul(1000);
        let from = avail_to.saturating_sub(span_ms).max(avail_from);
        let to = avail_to;

        let tags = self.sst.get_tags();
        tracing::info!(from, to, tag_count = tags.len(), "prefetching recent sst data into memt");
        let result = self.retrieve(&tags, from, to)?;

        let expires_at = clock.now_millis() + 10 * perform_expiration_every.as_millis() as u64;
        for (tag, measurements) in result {
            let pairs: Vec<(u64, Vec<u8>)> = measurements.into_iter().map(|m| (m.timestamp, m.value)).collect();
            self.memt.merge_with_prefetched(&tag, &pairs, expires_at);
        }
        Ok(())
    }

    pub fn retrieve(&self, tags: &[Vec<u8>], from: u64, to: u64) -> Result<HashMap<Vec<u8>, Vec<Measurement>>, EngineError> {
        let mut out = HashMap::with_capacity(tags.len());
        for tag in tags {
            let data = self.retrieve_data_for_tag(tag, from, to)?;
            out.insert(tag.clone(), data);
        }
        Ok(out)
    }

    /// MemT-first, SST-backfill merge for one tag (spec §4.10 algorithm).
    fn retrieve_data_for_tag(&self, tag: &[u8], from: u64, to: u64) -> Result<Vec<Measurement>, EngineError> {
        let memt = self.memt.memtable_for_tag(tag);
        let (memt_from, memt_to) = memt.lock().expect("memt lock poisoned").availability();
        let memt_data = if memt_from != 0 || memt_to != 0 {
            memt.lock().expect("memt lock poisoned").retrieve(from, to)
        } else {
            Vec::new()
        };

        let mut ts_to_value: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        let memt_insufficient = memt_from > from || memt_to < to || memt_from == 0 || memt_to == 0;
        if memt_insufficient {
            if let Some(sst) = self.sst.try_sst_for_tag(tag) {
                for entry in sst.get_entries_with_index(from, to)? {
                    ts_to_value.insert(entry.timestamp, entry.value);
                }
            }
        }
        for entry in &memt_data {
            ts_to_value.insert(entry.timestamp, entry.value.clone());
        }

        Ok(ts_to_value
            .into_iter()
            .map(|(timestamp, value)| Measurement { timestamp, value })
            .collect())
    }

    pub fn availability(&self) -> (u64, u64) {
        let (memt_from, memt_to) = self.memt.availability();
        let (sst_from, sst_to) = self.sst.availability();
        (min_nonzero(memt_from, sst_from), max_nonzero(memt_to, sst_to))
    }

    pub fn get_tags(&self) -> Vec<Vec<u8>> {
        let mut tags: std::collections::HashSet<Vec<u8>> = self.sst.get_tags().into_iter().collect();
        tags.extend(self.memt.get_tags());
        tags.into_iter().collect()
    }
}
