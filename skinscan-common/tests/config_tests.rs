//! Integration tests for config file resolution and graceful degradation
//!
//! Tests that touch SKINSCAN_CONFIG are marked #[serial] so the env var is
//! never mutated by two tests at once.

use serial_test::serial;
use skinscan_common::config::{
    load_toml_config, write_toml_config, AnalysisSettings, ConfigResolver, LoggingConfig,
    RecoverySettings, TomlConfig, CONFIG_ENV_VAR,
};
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn sample_config() -> TomlConfig {
    TomlConfig {
        logging: LoggingConfig {
            level: "debug".to_string(),
            log_file: None,
        },
        analysis: AnalysisSettings {
            preset: Some("low_memory".to_string()),
            total_timeout_ms: Some(45_000),
            ..Default::default()
        },
        recovery: RecoverySettings {
            max_attempts: Some(2),
            ..Default::default()
        },
    }
}

#[test]
#[serial]
fn test_cli_path_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/skinscan-from-env.toml");

    let resolver = ConfigResolver::new().with_cli_path(Some(PathBuf::from("/tmp/cli.toml")));
    assert_eq!(resolver.resolve(), Some(PathBuf::from("/tmp/cli.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_path() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/skinscan-from-env.toml");

    let resolver = ConfigResolver::new();
    assert_eq!(
        resolver.resolve(),
        Some(PathBuf::from("/tmp/skinscan-from-env.toml"))
    );

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_explicit_file_falls_back_to_defaults() {
    env::remove_var(CONFIG_ENV_VAR);
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("does-not-exist.toml");

    let config = ConfigResolver::new()
        .with_cli_path(Some(missing))
        .load()
        .unwrap();

    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("skinscan.toml");
    std::fs::write(&path, "[analysis\npreset = ").unwrap();

    let result = load_toml_config(&path);
    assert!(result.is_err());
}

#[test]
fn test_write_then_load_preserves_fields() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("skinscan.toml");
    let config = sample_config();

    write_toml_config(&config, &path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists());

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_overwrite_replaces_previous_content() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("skinscan.toml");

    write_toml_config(&sample_config(), &path).unwrap();
    write_toml_config(&TomlConfig::default(), &path).unwrap();

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded.analysis.preset, None);
    assert_eq!(loaded.recovery.max_attempts, None);
}
