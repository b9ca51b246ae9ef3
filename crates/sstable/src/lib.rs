//! # SST — per-tag sorted on-disk table
//!
//! The engine's long-term, bounded-size store. Every tag owns at most one
//! append-only, strictly-timestamp-ordered file plus an in-memory offset
//! index rebuilt from it at startup. New data either appends to the end of
//! the file (the common case: arrivals are roughly in order) or triggers a
//! copy-on-write resort when it lands inside or before the live window.
//!
//! ## File layout
//!
//! `u16 totalLen || SSTEntry bytes` (see [`codec::SstEntry`]), repeated,
//! records strictly non-decreasing by `timestamp`. No footer, no checksum,
//! no bloom filter — every read here is a timestamp-range scan, not a point
//! probe, so there is nothing for a bloom filter to shadow.

use codec::SstEntry;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use util::Clock;

/// Default resort-path debounce (spec §4.4): once a compaction runs, the
/// next one is delayed by at least this long.
pub const DEFAULT_COMPACTION_PERIOD_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Error)]
pub enum SstError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] codec::CodecError),

    /// A scan observed a timestamp less than the previous one.
    #[error("sst corrupt: tag file at offset {offset} has timestamp {ts} < previous {prev_ts}")]
    SstCorrupt { offset: u64, ts: u64, prev_ts: u64 },

    /// The in-memory index predicted more live records than the file scan
    /// returned.
    #[error("sst index mismatch: index predicted {expected} records, file scan produced {actual}")]
    SstIndexMismatch { expected: usize, actual: usize },
}

/// In-memory-only record of where a live SST entry lives on disk (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: u64,
    /// Offset of the record's `u16` length prefix.
    pub file_offset: i64,
    pub expires_at: u64,
}

struct Inner {
    file: File,
    index: BTreeMap<u64, IndexEntry>,
    /// End-of-file offset; the next append lands here.
    end_offset: i64,
    next_compaction_timestamp: u64,
}

/// One tag's sorted on-disk table plus its in-memory offset index (spec
/// §4.4 — the core algorithmic component).
pub struct SstForTag {
    path: PathBuf,
    inner: Mutex<Inner>,
    compaction_period_ms: u64,
    clock: Arc<dyn Clock>,
}

/// Reads one length-prefixed [`SstEntry`] from `r`, returning `None` on a
/// clean EOF. Returns the offset at which the record's length prefix began
/// alongside the decoded entry.
fn read_one<R: Read + Seek>(r: &mut R) -> Result<Option<(SstEntry, u64)>, SstError> {
    let offset = r.stream_position()?;
    match codec::read_length_prefix(r)? {
        None => Ok(None),
        Some(body_len) => {
            let entry = SstEntry::decode_body(r, body_len as usize)?;
            Ok(Some((entry, offset)))
        }
    }
}

/// Scans every record in `path` in order, asserting non-decreasing
/// timestamps, rebuilding the in-memory index as it goes.
fn scan_and_build_index(path: &Path) -> Result<(BTreeMap<u64, IndexEntry>, i64), SstError> {
    let mut index = BTreeMap::new();
    if !path.exists() {
        return Ok((index, 0));
    }
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut prev_ts = 0u64;
    let mut last_offset = 0u64;
    loop {
        let start = reader.stream_position()?;
        match read_one(&mut reader)? {
            None => {
                last_offset = start;
                break;
            }
            Some((entry, offset)) => {
                if entry.timestamp < prev_ts {
                    return Err(SstError::SstCorrupt {
                        offset,
                        ts: entry.timestamp,
                        prev_ts,
                    });
                }
                prev_ts = entry.timestamp;
                index.insert(
                    entry.timestamp,
                    IndexEntry {
                        timestamp: entry.timestamp,
                        file_offset: offset as i64,
                        expires_at: entry.expires_at,
                    },
                );
                last_offset = reader.stream_position()?;
            }
        }
    }
    Ok((index, last_offset as i64))
}

impl SstForTag {
    /// Ensures the parent directory exists; if `path` already exists, opens
    /// it for append and rebuilds the index by scanning every record, else
    /// creates it empty.
    pub fn init(path: impl AsRef<Path>, compaction_period_ms: u64, clock: Arc<dyn Clock>) -> Result<Self, SstError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let (index, end_offset) = scan_and_build_index(&path)?;
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        let next_compaction_timestamp = clock.now_millis() + compaction_period_ms;
        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                index,
                end_offset,
                next_compaction_timestamp,
            }),
            compaction_period_ms,
            clock,
        })
    }

    /// Sorts `entries` by timestamp (stable) and takes the append path if
    /// arrivals are at or after the live max and the compaction debounce
    /// hasn't elapsed, otherwise takes the copy-on-write resort path. An
    /// empty table always appends.
    pub fn merge_with_commitlog(&self, mut entries: Vec<SstEntry>) -> Result<(), SstError> {
        if entries.is_empty() {
            return Ok(());
        }
        entries.sort_by_key(|e| e.timestamp);
        let cl_min = entries[0].timestamp;
        let now = self.clock.now_millis();

        let mut guard = self.inner.lock().expect("sst inner lock poisoned");
        let current_max = guard.index.keys().next_back().copied().unwrap_or(0);

        let take_append_path = current_max == 0
            || (cl_min >= current_max && now < guard.next_compaction_timestamp);

        if take_append_path {
            self.append_data_to_end_of_table(&mut guard, &entries)
        } else {
            tracing::info!(tag_file = %self.path.display(), "sst resort path");
            self.add_data_resorting_table(&mut guard, &entries, now)
        }
    }

    fn append_data_to_end_of_table(&self, guard: &mut Inner, sorted: &[SstEntry]) -> Result<(), SstError> {
        let start_offset = guard.file.seek(SeekFrom::End(0))?;
        let mut offset = start_offset;
        let mut writer = BufWriter::new(&mut guard.file);
        for entry in sorted {
            let framed = entry.encode_with_length()?;
            writer.write_all(&framed)?;
            guard.index.insert(
                entry.timestamp,
                IndexEntry {
                    timestamp: entry.timestamp,
                    file_offset: offset as i64,
                    expires_at: entry.expires_at,
                },
            );
            offset += framed.len() as u64;
        }
        writer.flush()?;
        drop(writer);
        guard.file.sync_all()?;
        guard.end_offset = offset as i64;
        tracing::trace!(tag_file = %self.path.display(), start_offset, count = sorted.len(), "sst append");
        Ok(())
    }

    /// Copy-on-write compaction: rewrite the whole file interleaving the
    /// existing sorted records with the new ones, letting a new record at an
    /// existing timestamp override the old one.
    fn add_data_resorting_table(&self, guard: &mut Inner, sorted: &[SstEntry], now: u64) -> Result<(), SstError> {
        let copy_path = self.path.with_extension("copy");
        let copy_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&copy_path)?;
        let mut copy = BufWriter::new(copy_file);

        guard.file.seek(SeekFrom::Start(0))?;
        let mut existing_reader = BufReader::new(&guard.file);
        let mut idx = 0usize;

        loop {
            let existing = read_one(&mut existing_reader)?;
            let Some((e, _offset)) = existing else { break };
            let mut ban_existing = false;
            while idx < sorted.len() && sorted[idx].timestamp <= e.timestamp {
                if sorted[idx].timestamp == e.timestamp {
                    ban_existing = true;
                }
                copy.write_all(&sorted[idx].encode_with_length()?)?;
                idx += 1;
            }
            if !ban_existing {
                copy.write_all(&e.encode_with_length()?)?;
            }
        }
        while idx < sorted.len() {
            copy.write_all(&sorted[idx].encode_with_length()?)?;
            idx += 1;
        }

        copy.flush()?;
        copy.into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()?;
        drop(existing_reader);

        std::fs::rename(&copy_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        guard.file = OpenOptions::new().create(true).append(true).read(true).open(&self.path)?;
        let (index, end_offset) = scan_and_build_index(&self.path)?;
        guard.index = index;
        guard.end_offset = end_offset;
        guard.next_compaction_timestamp = now + self.compaction_period_ms;
        Ok(())
    }

    /// Scans and returns every record, sorted by timestamp (already sorted
    /// on disk by invariant; the extra sort is defensive).
    pub fn get_all_entries(&self) -> Result<Vec<SstEntry>, SstError> {
        let guard = self.inner.lock().expect("sst inner lock poisoned");
        let mut entries: Vec<SstEntry> = Self::scan_entries(&self.path)?;
        entries.sort_by_key(|e| e.timestamp);
        drop(guard);
        Ok(entries)
    }

    fn scan_entries(path: &Path) -> Result<Vec<SstEntry>, SstError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut out = Vec::new();
        while let Some((entry, _offset)) = read_one(&mut reader)? {
            out.push(entry);
        }
        Ok(out)
    }

    /// Ascends the index in `[from_ts, to_ts]`, skipping expired entries, to
    /// find how many live records to expect and where the first one lives,
    /// then scans the file from there, reconciling the count. Raises
    /// [`SstError::SstIndexMismatch`] if index and file disagree.
    pub fn get_entries_with_index(&self, from_ts: u64, to_ts: u64) -> Result<Vec<SstEntry>, SstError> {
        let mut guard = self.inner.lock().expect("sst inner lock poisoned");
        let now = self.clock.now_millis();

        self.perform_expiration_within_index(&mut guard, now);

        let candidates: Vec<&IndexEntry> = guard
            .index
            .range(from_ts..=to_ts)
            .map(|(_, v)| v)
            .filter(|e| e.expires_at == 0 || e.expires_at >= now)
            .collect();
        let count = candidates.len();
        if count == 0 {
            return Ok(Vec::new());
        }
        let first_offset = candidates[0].file_offset as u64;

        guard.file.seek(SeekFrom::Start(first_offset))?;
        let mut reader = BufReader::new(&guard.file);
        let mut kept = Vec::with_capacity(count);
        while kept.len() < count {
            match read_one(&mut reader)? {
                None => break,
                Some((entry, _offset)) => {
                    if entry.timestamp > 0
                        && entry.timestamp >= from_ts
                        && entry.timestamp <= to_ts
                        && (entry.expires_at == 0 || entry.expires_at >= now)
                    {
                        kept.push(entry);
                    }
                }
            }
        }

        if kept.len() != count {
            return Err(SstError::SstIndexMismatch {
                expected: count,
                actual: kept.len(),
            });
        }
        Ok(kept)
    }

    /// Full file scan with the same filter as
    /// [`get_entries_with_index`](Self::get_entries_with_index); used for
    /// verification and benchmarking, bypassing the index entirely.
    pub fn get_entries_without_index(&self, from_ts: u64, to_ts: u64) -> Result<Vec<SstEntry>, SstError> {
        let guard = self.inner.lock().expect("sst inner lock poisoned");
        let now = self.clock.now_millis();
        let all = Self::scan_entries(&self.path)?;
        drop(guard);
        Ok(all
            .into_iter()
            .filter(|e| {
                e.timestamp > 0
                    && e.timestamp >= from_ts
                    && e.timestamp <= to_ts
                    && (e.expires_at == 0 || e.expires_at >= now)
            })
            .collect())
    }

    /// `(min, max)` over non-expired index entries, `(0, 0)` if empty.
    pub fn availability(&self) -> (u64, u64) {
        let mut guard = self.inner.lock().expect("sst inner lock poisoned");
        let now = self.clock.now_millis();
        loop {
            let min = guard.index.keys().next().copied();
            let max = guard.index.keys().next_back().copied();
            let (Some(min), Some(max)) = (min, max) else {
                return (0, 0);
            };
            let min_expired = guard.index[&min].expires_at != 0 && guard.index[&min].expires_at < now;
            let max_expired = guard.index[&max].expires_at != 0 && guard.index[&max].expires_at < now;
            if !min_expired && !max_expired {
                return (min, max);
            }
            let removed = self.perform_expiration_within_index(&mut guard, now);
            if removed == 0 {
                // Nothing more to drop in-memory; avoid looping forever.
                let min = guard.index.keys().next().copied().unwrap_or(0);
                let max = guard.index.keys().next_back().copied().unwrap_or(0);
                return (min, max);
            }
        }
    }

    fn perform_expiration_within_index(&self, guard: &mut Inner, now: u64) -> usize {
        let expired: Vec<u64> = guard
            .index
            .iter()
            .filter(|(_, e)| e.expires_at != 0 && e.expires_at < now)
            .map(|(&ts, _)| ts)
            .collect();
        for ts in &expired {
            guard.index.remove(ts);
        }
        if !expired.is_empty() {
            tracing::warn!(tag_file = %self.path.display(), removed = expired.len(), "sst in-memory expiration");
        }
        expired.len()
    }
}

/// Per-tag registry, fan-out merge, and availability rollup (spec §4.5).
pub struct SstManager {
    root: PathBuf,
    registry: Mutex<HashMap<Vec<u8>, Arc<SstForTag>>>,
    compaction_period_ms: u64,
    clock: Arc<dyn Clock>,
}

impl SstManager {
    /// Scans `root` for base58-encoded tag filenames and constructs the
    /// corresponding [`SstForTag`] for each (which rebuilds its own index).
    pub fn init_storage(
        root: impl AsRef<Path>,
        compaction_period_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, SstError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let mut registry = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let filename = entry.file_name();
            let Some(filename) = filename.to_str() else { continue };
            let Some(tag) = util::decode_tag(filename) else { continue };
            let sst = SstForTag::init(entry.path(), compaction_period_ms, Arc::clone(&clock))?;
            registry.insert(tag, Arc::new(sst));
        }

        Ok(Arc::new(Self {
            root,
            registry: Mutex::new(registry),
            compaction_period_ms,
            clock,
        }))
    }

    fn path_for(&self, tag: &[u8]) -> PathBuf {
        self.root.join(util::encode_tag(tag))
    }

    /// Returns (lazily creating if missing) the per-tag handle. Lookup-or-
    /// insert happens under one lock acquisition, guaranteeing per-tag
    /// singleton identity.
    pub fn sst_for_tag(&self, tag: &[u8]) -> Result<Arc<SstForTag>, SstError> {
        let mut registry = self.registry.lock().expect("sst registry lock poisoned");
        if let Some(sst) = registry.get(tag) {
            return Ok(Arc::clone(sst));
        }
        let sst = Arc::new(SstForTag::init(
            self.path_for(tag),
            self.compaction_period_ms,
            Arc::clone(&self.clock),
        )?);
        registry.insert(tag.to_vec(), Arc::clone(&sst));
        Ok(sst)
    }

    /// Returns the existing handle for `tag` without creating one.
    pub fn try_sst_for_tag(&self, tag: &[u8]) -> Option<Arc<SstForTag>> {
        self.registry.lock().expect("sst registry lock poisoned").get(tag).cloned()
    }

    /// Groups `entries` by tag (dropping the tag-specific `key` field, since
    /// each tag's SST is tagless) and dispatches one merge per tag, one
    /// worker thread per group, joined before returning.
    pub fn merge_with_commitlog(&self, entries: &[codec::CommitEntry]) -> Result<(), SstError> {
        let mut by_tag: HashMap<Vec<u8>, Vec<SstEntry>> = HashMap::new();
        for e in entries {
            by_tag.entry(e.key.clone()).or_default().push(SstEntry {
                timestamp: e.timestamp,
                expires_at: e.expires_at,
                value: e.value.clone(),
            });
        }

        let results: Vec<Result<(), SstError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = by_tag
                .into_iter()
                .map(|(tag, batch)| {
                    scope.spawn(move || -> Result<(), SstError> {
                        let sst = self.sst_for_tag(&tag)?;
                        sst.merge_with_commitlog(batch)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("sst merge worker panicked")).collect()
        });

        for result in results {
            result?;
        }
        Ok(())
    }

    /// `(min, max)` across all non-empty tags (zero means "no data").
    pub fn availability(&self) -> (u64, u64) {
        let registry = self.registry.lock().expect("sst registry lock poisoned");
        let mut min = 0u64;
        let mut max = 0u64;
        for sst in registry.values() {
            let (lo, hi) = sst.availability();
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
        self.registry.lock().expect("sst registry lock poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests;
