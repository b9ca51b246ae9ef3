//! # Engine — time-series storage orchestrator
//!
//! Ties [`commitlog`], [`memtable`], and [`sstable`] together into the
//! complete engine: durable writes land in the commit log first, are applied
//! to the per-tag MemT, and are periodically flushed into per-tag SSTs by the
//! [`DiskWriter`] background coordinator. Reads merge the MemT's recent
//! window with the SST's on-disk range via [`StorageReader`].
//!
//! ## Write path
//!
//! `Store`/`StoreBatch` → [`DiskWriter::store_multiple`] (commit log, counts
//! toward the rotation threshold) → [`memtable::MemtManager::merge_with_commitlog_for_tag`].
//!
//! ## Flush path
//!
//! Every `period_between_flushes`, or once `entries_per_commitlog` writes
//! have accumulated, [`DiskWriter`] drains the active commit log, swaps the
//! double buffer, and merges the drained batch into each tag's SST.
//!
//! ## Read path
//!
//! [`StorageReader::retrieve`] checks the MemT first; if it cannot cover the
//! requested range, it backfills from the tag's SST via its offset index.

mod disk_writer;
mod storage_reader;
mod storage_writer;

pub use disk_writer::DiskWriter;
pub use storage_reader::StorageReader;
pub use storage_writer::StorageWriter;

use std::collections::HashMap;
use std::sync::Arc;

use config::EngineConfig;
use thiserror::Error;
use util::{Clock, SystemClock};

/// Aggregate error type exposed by the engine and everything above it (spec
/// §7). Each variant wraps one lower crate's narrow error type; the Io/Codec/
/// SstCorrupt/SstIndexMismatch taxonomy lives inside [`sstable::SstError`] and
/// [`commitlog::CommitLogError`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("commit log error: {0}")]
    CommitLog(#[from] commitlog::CommitLogError),

    #[error("sst error: {0}")]
    Sst(#[from] sstable::SstError),

    #[error("memt error: {0}")]
    Memt(#[from] memtable::MemtError),

    #[error("codec error: {0}")]
    Codec(#[from] codec::CodecError),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// A single `(timestamp, value)` pair for a tag whose identity is implied by
/// context (spec Glossary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub timestamp: u64,
    pub value: Vec<u8>,
}

/// A [`Measurement`] carrying its own tag, used by [`StorageWriter::store_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedMeasurement {
    pub tag: Vec<u8>,
    pub timestamp: u64,
    pub value: Vec<u8>,
}

/// Returns the larger of two "zero means absent" timestamps.
fn max_nonzero(a: u64, b: u64) -> u64 {
    a.max(b)
}

/// Returns the smaller of two "zero means absent" timestamps, treating `0` as
/// absent rather than as the smallest possible value.
fn min_nonzero(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, x) | (x, 0) => x,
        (a, b) => a.min(b),
    }
}

/// Bring-up bundle: owns the commit log, both per-tag managers, the flush
/// coordinator, and the read path, constructed from an [`EngineConfig`].
pub struct Engine {
    writer: Arc<StorageWriter>,
    reader: Arc<StorageReader>,
    disk_writer: Arc<DiskWriter>,
    memt: Arc<memtable::MemtManager>,
}

impl Engine {
    /// Brings up every component: commit log, SST manager (which rebuilds
    /// every tag's index by scanning its file), MemT manager (starts the
    /// expiration sweep), the flush timer, and the startup prefetch.
    pub fn init(config: &EngineConfig) -> Result<Arc<Self>, EngineError> {
        Self::init_with_clock(config, Arc::new(SystemClock))
    }

    pub fn init_with_clock(config: &EngineConfig, clock: Arc<dyn Clock>) -> Result<Arc<Self>, EngineError> {
        let disk_writer = DiskWriter::init_storage(
            &config.commitlog_path,
            &config.sst_path,
            config.entries_per_commitlog,
            config.period_between_flushes(),
            sstable::DEFAULT_COMPACTION_PERIOD_MS,
            Arc::clone(&clock),
        )?;

        let memt = memtable::MemtManager::init_storage(
            config.memt_max_entries_per_tag,
            config.memt_perform_expiration_every(),
            Arc::clone(&clock),
        );

        let writer = Arc::new(StorageWriter::new(Arc::clone(&disk_writer), Arc::clone(&memt)));
        let reader = StorageReader::init(
            Arc::clone(&memt),
            disk_writer.sst_manager(),
            config.memt_prefetch_seconds,
            config.memt_perform_expiration_every(),
            clock,
        )?;

        Ok(Arc::new(Self {
            writer,
            reader,
            disk_writer,
            memt,
        }))
    }

    pub fn store(&self, measurements: &HashMap<Vec<u8>, Vec<Measurement>>, expires_at: u64) -> Result<(), EngineError> {
        self.writer.store(measurements, expires_at)
    }

    pub fn store_batch(&self, measurements: &[TaggedMeasurement], expires_at: u64) -> Result<(), EngineError> {
        self.writer.store_batch(measurements, expires_at)
    }

    pub fn retrieve(&self, tags: &[Vec<u8>], from: u64, to: u64) -> Result<HashMap<Vec<u8>, Vec<Measurement>>, EngineError> {
        self.reader.retrieve(tags, from, to)
    }

    pub fn availability(&self) -> (u64, u64) {
        self.reader.availability()
    }

    pub fn get_tags(&self) -> Vec<Vec<u8>> {
        self.reader.get_tags()
    }

    /// Stops the flush timer and the MemT expiration sweep, joining both
    /// background threads.
    pub fn close(&self) {
        self.disk_writer.close_storage();
        self.memt.close_storage();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests;
