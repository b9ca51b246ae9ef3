use super::*;

#[test]
fn default_config_is_valid() {
    let cfg = EngineConfig::default();
    assert_eq!(cfg.memt_max_entries_per_tag, DEFAULT_MEMT_MAX_ENTRIES_PER_TAG);
    assert!(ConfigBuilder::new().build().is_ok());
}

#[test]
fn builder_overrides_fields() {
    let cfg = ConfigBuilder::new()
        .commitlog_path("/tmp/cl")
        .sst_path("/tmp/sst")
        .entries_per_commitlog(50)
        .memt_max_entries_per_tag(4)
        .memt_prefetch_seconds(10)
        .build()
        .unwrap();
    assert_eq!(cfg.commitlog_path, "/tmp/cl");
    assert_eq!(cfg.sst_path, "/tmp/sst");
    assert_eq!(cfg.entries_per_commitlog, 50);
    assert_eq!(cfg.memt_max_entries_per_tag, 4);
    assert_eq!(cfg.memt_prefetch_seconds, 10);
}

#[test]
fn rejects_empty_paths() {
    let err = ConfigBuilder::new().commitlog_path("").build().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPath(_)));
}

#[test]
fn rejects_zero_entries_per_commitlog() {
    let err = ConfigBuilder::new().entries_per_commitlog(0).build().unwrap_err();
    assert!(matches!(err, ConfigError::ZeroThreshold { field: "entries_per_commitlog" }));
}

#[test]
fn rejects_zero_memt_max_entries() {
    let err = ConfigBuilder::new().memt_max_entries_per_tag(0).build().unwrap_err();
    assert!(matches!(err, ConfigError::ZeroThreshold { field: "memt_max_entries_per_tag" }));
}

#[test]
fn durations_derive_from_seconds_fields() {
    let cfg = ConfigBuilder::new()
        .period_between_flushes_secs(30)
        .memt_perform_expiration_every_secs(5)
        .build()
        .unwrap();
    assert_eq!(cfg.period_between_flushes(), Duration::from_secs(30));
    assert_eq!(cfg.memt_perform_expiration_every(), Duration::from_secs(5));
}

#[test]
fn config_is_clonable_and_comparable() {
    let a = EngineConfig::default();
    let b = a.clone();
    assert_eq!(a, b);
}
