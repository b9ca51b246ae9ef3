//! Engine-wide configuration: paths, flush cadence, and per-tag MemT sizing
//! (spec §6, §12). Transport-agnostic — parsing a TOML file or reading
//! environment variables is left to the caller (the `cli` crate); this crate
//! only owns validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default per spec §6: 10 entries per tag.
pub const DEFAULT_MEMT_MAX_ENTRIES_PER_TAG: usize = 10;
/// Default per spec §6: sweep every 10 seconds.
pub const DEFAULT_MEMT_PERFORM_EXPIRATION_EVERY_SECS: u64 = 10;
/// Default rotation threshold absent an explicit override.
pub const DEFAULT_ENTRIES_PER_COMMITLOG: usize = 1000;
/// Default rotation-timer interval absent an explicit override.
pub const DEFAULT_PERIOD_BETWEEN_FLUSHES_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{field} must be greater than zero")]
    ZeroThreshold { field: &'static str },
}

/// Engine bring-up configuration (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub commitlog_path: String,
    pub sst_path: String,
    pub entries_per_commitlog: usize,
    pub period_between_flushes_secs: u64,
    pub memt_max_entries_per_tag: usize,
    pub memt_perform_expiration_every_secs: u64,
    /// Span of SST data to pull into MemT at startup; `0` disables prefetch.
    pub memt_prefetch_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commitlog_path: "data/commitlog".to_string(),
            sst_path: "data/sst".to_string(),
            entries_per_commitlog: DEFAULT_ENTRIES_PER_COMMITLOG,
            period_between_flushes_secs: DEFAULT_PERIOD_BETWEEN_FLUSHES_SECS,
            memt_max_entries_per_tag: DEFAULT_MEMT_MAX_ENTRIES_PER_TAG,
            memt_perform_expiration_every_secs: DEFAULT_MEMT_PERFORM_EXPIRATION_EVERY_SECS,
            memt_prefetch_seconds: 0,
        }
    }
}

impl EngineConfig {
    pub fn period_between_flushes(&self) -> Duration {
        Duration::from_secs(self.period_between_flushes_secs)
    }

    pub fn memt_perform_expiration_every(&self) -> Duration {
        Duration::from_secs(self.memt_perform_expiration_every_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.commitlog_path.trim().is_empty() {
            return Err(ConfigError::InvalidPath("commitlog_path".to_string()));
        }
        if self.sst_path.trim().is_empty() {
            return Err(ConfigError::InvalidPath("sst_path".to_string()));
        }
        if self.entries_per_commitlog == 0 {
            return Err(ConfigError::ZeroThreshold { field: "entries_per_commitlog" });
        }
        if self.period_between_flushes_secs == 0 {
            return Err(ConfigError::ZeroThreshold { field: "period_between_flushes_secs" });
        }
        if self.memt_max_entries_per_tag == 0 {
            return Err(ConfigError::ZeroThreshold { field: "memt_max_entries_per_tag" });
        }
        if self.memt_perform_expiration_every_secs == 0 {
            return Err(ConfigError::ZeroThreshold { field: "memt_perform_expiration_every_secs" });
        }
        Ok(())
    }
}

/// Fluent builder over [`EngineConfig`], validated at [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self { config: EngineConfig::default() }
    }

    pub fn commitlog_path(mut self, path: impl Into<String>) -> Self {
        self.config.commitlog_path = path.into();
        self
    }

    pub fn sst_path(mut self, path: impl Into<String>) -> Self {
        self.config.sst_path = path.into();
        self
    }

    pub fn entries_per_commitlog(mut self, n: usize) -> Self {
        self.config.entries_per_commitlog = n;
        self
    }

    pub fn period_between_flushes_secs(mut self, secs: u64) -> Self {
        self.config.period_between_flushes_secs = secs;
        self
    }

    pub fn memt_max_entries_per_tag(mut self, n: usize) -> Self {
        self.config.memt_max_entries_per_tag = n;
        self
    }

    pub fn memt_perform_expiration_every_secs(mut self, secs: u64) -> Self {
        self.config.memt_perform_expiration_every_secs = secs;
        self
    }

    pub fn memt_prefetch_seconds(mut self, secs: u64) -> Self {
        self.config.memt_prefetch_seconds = secs;
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests;
