//! # Commit log — double-buffered durability for the time-series engine
//!
//! Every accepted write is appended to one of two on-disk files,
//! `COMMITLOGA` / `COMMITLOGB`, before it is applied to the in-memory table.
//! Exactly one of the two is "active" at any time; [`CommitLogManager`]
//! publishes the active pointer atomically so readers never observe a
//! half-initialized file, and the [`DiskWriter`](../engine) flush
//! coordinator drains the newly-inactive file once it has been swapped out.
//!
//! ## Record framing
//!
//! `u16 totalLen || CommitEntry bytes` (see [`codec::CommitEntry`]). No
//! checksum; a short read after the length prefix is reported as
//! [`CommitLogError::Codec`].

use codec::CommitEntry;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use arc_swap::ArcSwap;
use thiserror::Error;

/// Errors raised by [`OverFile`] and [`CommitLogManager`].
#[derive(Debug, Error)]
pub enum CommitLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] codec::CodecError),
}

/// A single append-only commit-log file (spec §4.2).
///
/// `RetrieveAll` closes the write handle, streams the file read-only, then
/// reopens the append handle — it is safe against concurrent writers only
/// because [`CommitLogManager`] holds a lock across the whole call.
pub struct OverFile {
    path: PathBuf,
    file: Mutex<File>,
    count: AtomicUsize,
}

impl OverFile {
    pub fn init<P: AsRef<Path>>(path: P) -> Result<Self, CommitLogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            count: AtomicUsize::new(0),
        })
    }

    /// Appends `entry.toByteArrayWithLength()` and increments the in-memory
    /// counter.
    pub fn store(&self, entry: &CommitEntry) -> Result<(), CommitLogError> {
        let framed = entry.encode_with_length()?;
        let mut file = self.file.lock().expect("commit log file lock poisoned");
        file.write_all(&framed)?;
        file.flush()?;
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn store_multiple(&self, entries: &[CommitEntry]) -> Result<(), CommitLogError> {
        let mut file = self.file.lock().expect("commit log file lock poisoned");
        for entry in entries {
            let framed = entry.encode_with_length()?;
            file.write_all(&framed)?;
        }
        file.flush()?;
        self.count.fetch_add(entries.len(), Ordering::SeqCst);
        Ok(())
    }

    /// Closes the write handle, reads every record in the file, then reopens
    /// the write handle for further appends.
    pub fn retrieve_all(&self) -> Result<Vec<CommitEntry>, CommitLogError> {
        let mut file = self.file.lock().expect("commit log file lock poisoned");
        file.flush()?;

        let read_handle = File::open(&self.path)?;
        let mut reader = BufReader::new(read_handle);
        let mut entries = Vec::new();
        while let Some(body_len) = codec::read_length_prefix(&mut reader)? {
            let entry = CommitEntry::decode_body(&mut reader, body_len as usize)?;
            entries.push(entry);
        }

        // Reopen the append handle positioned at end-of-file.
        *file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(entries)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Truncates the file to zero length and resets the counter.
    pub fn clear(&self) -> Result<(), CommitLogError> {
        let mut file = self.file.lock().expect("commit log file lock poisoned");
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        self.count.store(0, Ordering::SeqCst);
        Ok(())
    }
}

/// Which of the two commit-log files is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Which {
    A,
    B,
}

impl Which {
    fn other(self) -> Which {
        match self {
            Which::A => Which::B,
            Which::B => Which::A,
        }
    }
}

/// Double-buffered active/inactive commit logs with atomic swap (spec §4.3).
pub struct CommitLogManager {
    a: OverFile,
    b: OverFile,
    active: ArcSwap<Which>,
}

impl CommitLogManager {
    /// Creates `dir` if needed, initializes both `COMMITLOGA` and
    /// `COMMITLOGB`, and sets the active pointer to `A`. `B` — the "other"
    /// file — is populated here too, so the first [`swap_commitlogs`]
    /// never dereferences an unset inactive pointer.
    pub fn init<P: AsRef<Path>>(dir: P) -> Result<Self, CommitLogError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let a = OverFile::init(dir.join("COMMITLOGA"))?;
        let b = OverFile::init(dir.join("COMMITLOGB"))?;
        Ok(Self {
            a,
            b,
            active: ArcSwap::from_pointee(Which::A),
        })
    }

    fn file(&self, which: Which) -> &OverFile {
        match which {
            Which::A => &self.a,
            Which::B => &self.b,
        }
    }

    pub fn store(&self, entry: &CommitEntry) -> Result<(), CommitLogError> {
        let active = **self.active.load();
        self.file(active).store(entry)
    }

    pub fn store_multiple(&self, entries: &[CommitEntry]) -> Result<(), CommitLogError> {
        let active = **self.active.load();
        self.file(active).store_multiple(entries)
    }

    /// Atomically swaps the active/inactive pointers. After this call the
    /// prior-active file is the inactive one and safe to drain.
    pub fn swap_commitlogs(&self) {
        let previous = **self.active.load();
        self.active.store(std::sync::Arc::new(previous.other()));
        tracing::debug!(from = ?previous, to = ?previous.other(), "swapped commit logs");
    }

    pub fn retrieve_all(&self) -> Result<Vec<CommitEntry>, CommitLogError> {
        let active = **self.active.load();
        self.file(active).retrieve_all()
    }

    pub fn retrieve_all_from_previous(&self) -> Result<Vec<CommitEntry>, CommitLogError> {
        let active = **self.active.load();
        self.file(active.other()).retrieve_all()
    }

    pub fn clear_previous(&self) -> Result<(), CommitLogError> {
        let active = **self.active.load();
        self.file(active.other()).clear()
    }
}
