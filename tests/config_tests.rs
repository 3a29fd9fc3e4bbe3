use gigboard::config::{AppConfig, ConfigError};
use gigboard::test_utils::env_lock;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const OVERRIDE_NAMES: [&str; 8] = [
    "DB_PATH",
    "HOST",
    "PORT",
    "LOG_LEVEL",
    "DEBUG_MODE",
    "ADDITIONAL_DEBUG",
    "CORS_POLICY_DISABLED",
    "FILE_DIRECTORY",
];

fn clear_overrides() {
    for name in OVERRIDE_NAMES {
        env::remove_var(name);
        env::remove_var(format!("GIGBOARD_{}", name));
    }
}

#[test]
fn test_load_valid_basic_config() {
    let fixture_path = PathBuf::from("tests/fixtures/config/valid_basic.toml");
    let config = AppConfig::load_from_file(&fixture_path).unwrap();

    assert_eq!(config.database.path, PathBuf::from("data/marketplace.duckdb"));
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 8080);
    assert!(!config.server.enable_cors);
    assert!(config.server.debug_mode);
    assert_eq!(config.logging.level, "debug");
    assert!(!config.logging.additional_debug);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_invalid_log_level() {
    let fixture_path = PathBuf::from("tests/fixtures/config/invalid_log_level.toml");
    let config = AppConfig::load_from_file(&fixture_path).unwrap();
    assert_eq!(
        config.validate(),
        Err(ConfigError::InvalidLogLevel("verbose".to_string()))
    );
}

#[test]
fn test_load_invalid_port() {
    let fixture_path = PathBuf::from("tests/fixtures/config/invalid_port.toml");
    let config = AppConfig::load_from_file(&fixture_path).unwrap();
    assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
}

#[test]
fn test_missing_file_is_created_from_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested").join("gigboard.config.toml");

    let config = AppConfig::load_from_file(&config_path).unwrap();
    assert!(config_path.exists());
    assert_eq!(config, AppConfig::default());

    // The written file loads back to the same settings.
    let reloaded = AppConfig::load_from_file(&config_path).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[server\nport = ").unwrap();

    assert!(AppConfig::load_from_file(&config_path).is_err());
}

#[test]
#[serial]
fn test_env_override_precedence() {
    let _guard = env_lock().lock().unwrap();
    clear_overrides();

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[server]
port = 7001

[logging]
level = "info"
"#,
    )
    .unwrap();

    env::set_var("PORT", "9000");
    env::set_var("GIGBOARD_PORT", "9100");
    env::set_var("LOG_LEVEL", "DEBUG");
    env::set_var("GIGBOARD_DB_PATH", "/tmp/override.duckdb");
    env::set_var("DEBUG_MODE", "True");
    env::set_var("CORS_POLICY_DISABLED", "false");
    env::set_var("FILE_DIRECTORY", "/tmp/plain-files");
    env::set_var("GIGBOARD_FILE_DIRECTORY", "/tmp/gigboard-files");

    let mut config = AppConfig::load_from_file(&config_path).unwrap();
    config.apply_env_overrides();

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.database.path, PathBuf::from("/tmp/override.duckdb"));
    assert!(config.server.debug_mode);
    assert!(!config.server.enable_cors);
    assert_eq!(config.storage.directory, PathBuf::from("/tmp/gigboard-files"));
    assert!(config.validate().is_ok());

    clear_overrides();
}

#[test]
#[serial]
fn test_invalid_port_override_is_ignored() {
    let _guard = env_lock().lock().unwrap();
    clear_overrides();

    env::set_var("GIGBOARD_PORT", "not-a-port");
    let mut config = AppConfig::default();
    config.apply_env_overrides();
    assert_eq!(config.server.port, 7001);

    clear_overrides();
}

#[test]
fn test_summary_mentions_listener() {
    let config = AppConfig::default();
    let summary = config.summary();
    assert!(summary.contains("localhost:7001"));
    assert!(summary.contains("gigboard.duckdb"));
}
