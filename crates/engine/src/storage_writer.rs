//! Write-side fan-out: commit-log durability first, then the in-memory table
//! (spec §4.9).

use std::collections::HashMap;
use std::sync::Arc;

use codec::CommitEntry;
use memtable::MemtManager;

use crate::{DiskWriter, EngineError, Measurement, TaggedMeasurement};

pub struct StorageWriter {
    disk: Arc<DiskWriter>,
    memt: Arc<MemtManager>,
}

impl StorageWriter {
    pub(crate) fn new(disk: Arc<DiskWriter>, memt: Arc<MemtManager>) -> Self {
        Self { disk, memt }
    }

    /// For each tag, builds a batch of [`CommitEntry`], durably writes it via
    /// [`DiskWriter::store_multiple`], then applies it to that tag's MemT.
    pub fn store(&self, measurements: &HashMap<Vec<u8>, Vec<Measurement>>, expires_at: u64) -> Result<(), EngineError> {
        for (tag, batch) in measurements {
            let entries: Vec<CommitEntry> = batch
                .iter()
                .map(|m| CommitEntry {
                    key: tag.clone(),
                    timestamp: m.timestamp,
                    expires_at,
                    value: m.value.clone(),
                })
                .collect();
            self.disk.store_multiple(&entries)?;
            self.memt.merge_with_commitlog_for_tag(tag, &entries);
        }
        Ok(())
    }

    /// Groups `measurements` by tag, then applies the same path as
    /// [`store`](Self::store) per group.
    pub fn store_batch(&self, measurements: &[TaggedMeasurement], expires_at: u64) -> Result<(), EngineError> {
        let mut by_tag: HashMap<Vec<u8>, Vec<Measurement>> = HashMap::new();
        for m in measurements {
            by_tag.entry(m.tag.clone()).or_default().push(Measurement {
                timestamp: m.timestamp,
                value: m.value.clone(),
            });
        }
        self.store(&by_tag, expires_at)
    }
}
