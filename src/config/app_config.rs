//! Application-level configuration
//!
//! Defines the top-level configuration of the marketplace service: database
//! location, uploaded file storage, HTTP listener and logging.

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Embedded default configuration file
const DEFAULT_CONFIG: &str = include_str!("../../gigboard.config.toml");

/// Configuration file name
const CONFIG_FILE_NAME: &str = "gigboard.config.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Server port must be greater than 0")]
    InvalidPort,

    #[error("Server host cannot be empty")]
    EmptyHost,

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Storage directory cannot be empty")]
    EmptyStorageDirectory,

    #[error("Maximum file size must be greater than 0")]
    InvalidMaxFileSize,
}

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the first file found, or the embedded default
    pub fn load() -> Result<Self> {
        // ./gigboard.config.toml
        if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_NAME) {
            return toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", CONFIG_FILE_NAME));
        }

        // ~/.gigboard/gigboard.config.toml
        if let Some(base_dirs) = BaseDirs::new() {
            let home_config = base_dirs.home_dir().join(".gigboard").join(CONFIG_FILE_NAME);
            if let Ok(content) = std::fs::read_to_string(&home_config) {
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", home_config.display()));
            }
        }

        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            if let Ok(content) = std::fs::read_to_string(&config_path) {
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", config_path));
            }
        }

        tracing::debug!("No configuration file found, using embedded defaults");
        Self::embedded_default()
    }

    /// Load configuration from a specific file path.
    /// If the file doesn't exist, it is created with the default settings.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "Configuration file not found at {}. Creating with default settings...",
                    path.display()
                );

                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
                    }
                }
                std::fs::write(path, DEFAULT_CONFIG)
                    .with_context(|| format!("Failed to create config file at {}", path.display()))?;

                Self::embedded_default()
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read config file {}", path.display())),
        }
    }

    pub fn embedded_default() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG).context("Failed to parse embedded default config")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if self.storage.directory.as_os_str().is_empty() {
            return Err(ConfigError::EmptyStorageDirectory);
        }
        if self.storage.max_file_size == 0 {
            return Err(ConfigError::InvalidMaxFileSize);
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        // Prefer GIGBOARD_* over the bare legacy names if both are present
        fn first(name: &str) -> Option<String> {
            std::env::var(format!("GIGBOARD_{}", name))
                .ok()
                .or_else(|| std::env::var(name).ok())
        }

        fn flag(name: &str) -> Option<bool> {
            first(name).map(|value| {
                matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
            })
        }

        if let Some(db_path) = first("DB_PATH") {
            self.database.path = PathBuf::from(db_path);
        }
        if let Some(directory) = first("FILE_DIRECTORY") {
            self.storage.directory = PathBuf::from(directory);
        }
        if let Some(host) = first("HOST") {
            self.server.host = host;
        }
        if let Some(port) = first("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid port override: {}", port),
            }
        }
        if let Some(level) = first("LOG_LEVEL") {
            self.logging.level = level.to_ascii_lowercase();
        }
        if let Some(debug) = flag("DEBUG_MODE") {
            self.server.debug_mode = debug;
        }
        if let Some(additional) = flag("ADDITIONAL_DEBUG") {
            self.logging.additional_debug = additional;
        }
        if let Some(permissive) = flag("CORS_POLICY_DISABLED") {
            self.server.enable_cors = permissive;
        }
    }

    /// Get a summary of the configuration
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str("Configuration loaded:\n");
        summary.push_str(&format!("Database: {}\n", self.database.path.display()));
        summary.push_str(&format!(
            "Files: {} (max {} bytes)\n",
            self.storage.directory.display(),
            self.storage.max_file_size
        ));
        summary.push_str(&format!("Listen: {}:{}\n", self.server.host, self.server.port));
        summary.push_str(&format!("CORS: {}\n", if self.server.enable_cors { "permissive" } else { "off" }));
        summary.push_str(&format!("Debug Mode: {}\n", self.server.debug_mode));
        summary.push_str(&format!("Logging Level: {}\n", self.logging.level));
        summary
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("gigboard.duckdb"),
        }
    }
}

/// Uploaded file storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory uploaded files are written to
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
    /// Largest accepted upload, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Accepted extensions without the dot; empty accepts any
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("files")
}

fn default_max_file_size() -> usize {
    10 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
            max_file_size: default_max_file_size(),
            allowed_extensions: Vec::new(),
        }
    }
}

impl StorageConfig {
    /// Whether a file called `name` may be stored.
    pub fn accepts_extension(&self, name: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let Some(ext) = Path::new(name).extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Install a permissive CORS layer
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
    /// Include internal error messages in HTTP responses
    #[serde(default)]
    pub debug_mode: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7001
}

fn default_enable_cors() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: default_enable_cors(),
            debug_mode: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Keep HTTP stack internals at the configured level instead of `warn`
    #[serde(default)]
    pub additional_debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            additional_debug: false,
        }
    }
}
