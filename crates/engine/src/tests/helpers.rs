use std::sync::Arc;

use config::ConfigBuilder;
use tempfile::TempDir;
use util::{Clock, FakeClock};

use crate::Engine;

/// A temp-dir-backed engine plus the clock driving it, so a test can both
/// advance time deterministically and exercise real file I/O.
pub struct Fixture {
    pub engine: Arc<Engine>,
    pub clock: FakeClock,
    _dir: TempDir,
}

pub fn engine_with(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Fixture {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new(1_700_000_000_000);
    let config = configure(
        ConfigBuilder::new()
            .commitlog_path(dir.path().join("commitlog").to_str().unwrap())
            .sst_path(dir.path().join("sst").to_str().unwrap())
            .entries_per_commitlog(1_000_000)
            .period_between_flushes_secs(3600)
            .memt_max_entries_per_tag(10)
            .memt_perform_expiration_every_secs(3600),
    )
    .build()
    .unwrap();

    let dyn_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let engine = Engine::init_with_clock(&config, dyn_clock).unwrap();
    Fixture { engine, clock, _dir: dir }
}
