use super::*;

#[test]
fn defaults() {
    let config = PoolConfig::default();
    assert_eq!(config.dictionary_size, 17);
    assert_eq!(config.stem_size, 11);
    assert_eq!(config.scope_size, 7);
}

#[test]
fn env_overrides_valid_sizes_only() {
    let config = PoolConfig::default().with_env(|key| match key {
        DICT_SIZE_ENV => Some("33".to_string()),
        STEM_SIZE_ENV => Some("zero".to_string()),
        SCOPE_SIZE_ENV => Some("0".to_string()),
        _ => None,
    });
    assert_eq!(config.dictionary_size, 33);
    assert_eq!(config.stem_size, 11);
    assert_eq!(config.scope_size, 7);
}

#[test]
fn toml_fills_missing_fields_with_defaults() {
    let config = PoolConfig::from_toml_str("stem_size = 5\n").unwrap();
    assert_eq!(config.stem_size, 5);
    assert_eq!(config.dictionary_size, 17);

    assert!(PoolConfig::from_toml_str("stem_size = \"big\"").is_err());
}

#[test]
fn load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.toml");
    std::fs::write(&path, "dictionary_size = 41\nscope_size = 3\n").unwrap();
    let config = PoolConfig::load(&path).unwrap();
    assert_eq!(config.dictionary_size, 41);
    assert_eq!(config.scope_size, 3);

    let err = PoolConfig::load(&dir.path().join("missing.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read"));
}

#[test]
fn oversized_sizes_are_rejected() {
    let huge = (MAX_INITIAL_PRIMARY_SIZE + 1).to_string();
    let config = PoolConfig::default().with_env(|key| match key {
        DICT_SIZE_ENV => Some(huge.clone()),
        STEM_SIZE_ENV => Some(usize::MAX.to_string()),
        _ => None,
    });
    assert_eq!(config, PoolConfig::default());

    let err = PoolConfig::from_toml_str("dictionary_size = 9223372036854775807\n").unwrap_err();
    assert!(format!("{:#}", err).contains("dictionary_size"), "{:#}", err);
    assert!(PoolConfig::from_toml_str("scope_size = 0\n").is_err());
}
