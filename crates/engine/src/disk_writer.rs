//! Flush coordinator: serializes commit-log writes against the periodic
//! drain-and-merge into SSTs (spec §4.8).

use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use codec::CommitEntry;
use commitlog::CommitLogManager;
use sstable::SstManager;
use util::Clock;

use crate::EngineError;

struct Writer {
    commitlog: CommitLogManager,
    current_entries: usize,
}

/// Owns the commit log and the SST manager, serializing `Store`/
/// `StoreMultiple` against `trySwitchCommitlog` under one mutex, and runs the
/// periodic flush timer that calls it (spec §4.8).
pub struct DiskWriter {
    sst: Arc<SstManager>,
    writer: Mutex<Writer>,
    entries_per_commitlog: usize,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskWriter {
    pub fn init_storage(
        commitlog_path: impl AsRef<Path>,
        sst_path: impl AsRef<Path>,
        entries_per_commitlog: usize,
        period_between_flushes: Duration,
        compaction_period_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, EngineError> {
        let commitlog = CommitLogManager::init(commitlog_path)?;
        let sst = SstManager::init_storage(sst_path, compaction_period_ms, clock)?;

        let disk_writer = Arc::new(Self {
            sst,
            writer: Mutex::new(Writer { commitlog, current_entries: 0 }),
            entries_per_commitlog,
            stop_tx: Mutex::new(None),
            worker: Mutex::new(None),
        });

        let (tx, rx) = mpsc::channel::<()>();
        let worker_handle = Arc::clone(&disk_writer);
        let join = std::thread::spawn(move || loop {
            match rx.recv_timeout(period_between_flushes) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Err(e) = worker_handle.try_switch_commitlog() {
                        tracing::error!(error = %e, "flush timer failed to switch commit log, aborting");
                        std::process::abort();
                    }
                }
            }
        });

        *disk_writer.stop_tx.lock().expect("stop_tx lock poisoned") = Some(tx);
        *disk_writer.worker.lock().expect("worker lock poisoned") = Some(join);
        Ok(disk_writer)
    }

    pub(crate) fn sst_manager(&self) -> Arc<SstManager> {
        Arc::clone(&self.sst)
    }

    pub fn store(&self, entry: &CommitEntry) -> Result<(), EngineError> {
        self.store_multiple(std::slice::from_ref(entry))
    }

    pub fn store_multiple(&self, entries: &[CommitEntry]) -> Result<(), EngineError> {
        let mut guard = self.writer.lock().expect("disk writer lock poisoned");
        guard.commitlog.store_multiple(entries)?;
        guard.current_entries += entries.len();
        if guard.current_entries >= self.entries_per_commitlog {
            self.drain_and_merge(&mut guard)?;
            guard.current_entries = 0;
        }
        Ok(())
    }

    fn try_switch_commitlog(&self) -> Result<(), EngineError> {
        let mut guard = self.writer.lock().expect("disk writer lock poisoned");
        self.drain_and_merge(&mut guard)?;
        guard.current_entries = 0;
        Ok(())
    }

    /// Reads everything out of the active log, swaps the double buffer,
    /// clears the newly-inactive file, then merges the drained batch into
    /// each tag's SST. Runs under the caller's held writer-mutex guard.
    fn drain_and_merge(&self, guard: &mut Writer) -> Result<(), EngineError> {
        let entries = guard.commitlog.retrieve_all()?;
        if entries.is_empty() {
            return Ok(());
        }
        guard.commitlog.swap_commitlogs();
        guard.commitlog.clear_previous()?;
        tracing::info!(count = entries.len(), "flushing commit log to sst");
        self.sst.merge_with_commitlog(&entries)?;
        Ok(())
    }

    /// Stops the flush timer on its next tick boundary and joins the thread.
    pub fn close_storage(&self) {
        if let Some(tx) = self.stop_tx.lock().expect("stop_tx lock poisoned").take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.worker.lock().expect("worker lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        self.close_storage();
    }
}
