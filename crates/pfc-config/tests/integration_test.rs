//! Integration tests for pfc-config
//!
//! These tests verify config parsing and layering with real files.

use tempfile::tempdir;

/// Test config loading from a real global config file
#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let pfc_dir = temp.path().join(".pfc");
    std::fs::create_dir_all(&pfc_dir).unwrap();

    let config_content = r#"
[cache]
block_size = 131072
prefetch = true
info_extension = ".meta"

[logging]
level = "debug"
"#;
    std::fs::write(pfc_dir.join("config.toml"), config_content).unwrap();

    let config = pfc_config::Config::from_file(&pfc_dir.join("config.toml")).unwrap();

    assert_eq!(config.cache.block_size, 131072);
    assert!(config.cache.prefetch);
    assert_eq!(config.cache.info_extension, ".meta");
    assert_eq!(
        config.cache.max_bitmap_bytes,
        pfc_info::DEFAULT_MAX_BITMAP_BYTES
    );
    assert_eq!(
        config.logging.log_level(),
        pfc_config::logging::LogLevel::Debug
    );
}

/// Test config hierarchy: project config overrides global
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();

    let global_path = temp.path().join("global.toml");
    std::fs::write(
        &global_path,
        "[cache]\nblock_size = 4096\nprefetch = true\n\n[logging]\nlevel = \"info\"\n",
    )
    .unwrap();

    let mut config = pfc_config::Config::from_file(&global_path).unwrap();
    let project: toml::Table = toml::from_str("[cache]\nblock_size = 8192\n").unwrap();
    config.merge(&project).unwrap();

    // overridden
    assert_eq!(config.cache.block_size, 8192);
    // inherited from global
    assert!(config.cache.prefetch);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_invalid_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("broken.toml");
    std::fs::write(&path, "[cache\nblock_size = ").unwrap();

    let err = pfc_config::Config::from_file(&path).unwrap_err();
    assert!(matches!(err, pfc_config::ConfigError::Toml(_)));
}

#[test]
fn test_config_drives_descriptor_options() {
    let config: pfc_config::Config =
        toml::from_str("[cache]\nprefetch = true\nmax_bitmap_bytes = 2\n").unwrap();
    let options = config.cache.descriptor_options();

    // 16 blocks fit in 2 bytes, 17 do not
    assert!(pfc_info::CacheDescriptor::with_geometry(options, 1, 16).is_ok());
    assert!(pfc_info::CacheDescriptor::with_geometry(options, 1, 17).is_err());
    let d = pfc_info::CacheDescriptor::with_geometry(options, 1, 16).unwrap();
    assert!(d.prefetch_bitmap().is_some());
}
