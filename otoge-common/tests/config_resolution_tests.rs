//! Configuration resolution tests
//!
//! Covers file loading, atomic write-back and the environment tier.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that touch OTOGE_SERVICE_* variables are marked with #[serial].

use otoge_common::config::{
    load_toml_config, resolve_config, write_toml_config, ConfigOverrides, TomlConfig,
};
use otoge_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_write_then_load_preserves_fields() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("otoge-sync.toml");

    let mut config = TomlConfig::default();
    config.bind_port = 7300;
    config.developer.enable_apply = true;
    config.providers.divingfish_base_url = Some("http://df.local".to_string());

    write_toml_config(&config, &path).unwrap();

    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists(), "temp file renamed away");
    assert_eq!(load_toml_config(&path).unwrap(), config);
}

#[test]
fn test_malformed_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "bind_port = \"not a number\"").unwrap();

    assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_explicit_missing_file_is_error() {
    let overrides = ConfigOverrides {
        config_path: Some(PathBuf::from("/nonexistent/otoge/otoge-sync.toml")),
        ..Default::default()
    };
    assert!(matches!(resolve_config(&overrides), Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_priority_cli_over_env_over_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("otoge-sync.toml");
    std::fs::write(
        &path,
        r#"
        bind_host = "0.0.0.0"
        bind_port = 7001
        lock_wait_ms = 100
        "#,
    )
    .unwrap();

    env::set_var("OTOGE_SERVICE_BIND_PORT", "7002");
    env::set_var("OTOGE_SERVICE_LOCK_WAIT_MS", "0");

    let overrides = ConfigOverrides {
        config_path: Some(path),
        bind_port: Some(7003),
        ..Default::default()
    };
    let config = resolve_config(&overrides);

    env::remove_var("OTOGE_SERVICE_BIND_PORT");
    env::remove_var("OTOGE_SERVICE_LOCK_WAIT_MS");

    let config = config.unwrap();
    assert_eq!(config.bind_host, "0.0.0.0", "file value kept");
    assert_eq!(config.lock_wait_ms, 0, "env beats file");
    assert_eq!(config.bind_port, 7003, "cli beats env");
}

#[test]
#[serial]
fn test_env_bool_parsing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("otoge-sync.toml");
    std::fs::write(&path, "").unwrap();

    env::set_var("OTOGE_SERVICE_ENABLE_DEVELOPER_APPLY", "yes");
    let result = resolve_config(&ConfigOverrides {
        config_path: Some(path),
        ..Default::default()
    });
    env::remove_var("OTOGE_SERVICE_ENABLE_DEVELOPER_APPLY");

    assert!(matches!(result, Err(Error::Config(_))), "only true/false accepted");
}
