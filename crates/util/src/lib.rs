//! Small external-capability seams the storage engine depends on but does not
//! own: wall-clock time and the filesystem-safe tag encoding used for SST
//! filenames.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock milliseconds, abstracted so tests can substitute a
/// deterministic clock instead of sleeping on real time.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Production clock backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as u64
    }
}

/// Deterministic clock for tests: reads and writes a shared counter.
#[derive(Debug, Clone)]
pub struct FakeClock {
    millis: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl FakeClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, delta_millis: u64) {
        self.millis
            .fetch_add(delta_millis, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Encodes arbitrary tag bytes as a filesystem-safe base58 string, used for
/// SST filenames (spec §4.5).
pub fn encode_tag(tag: &[u8]) -> String {
    bs58::encode(tag).into_string()
}

/// Decodes a base58-encoded filename back into the original tag bytes.
/// Returns `None` if the filename is not valid base58 (e.g. a stray file
/// left in the SST root directory).
pub fn decode_tag(filename: &str) -> Option<Vec<u8>> {
    bs58::decode(filename).into_vec().ok()
}
