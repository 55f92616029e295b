//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::source::SourceConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token attached to image requests
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            base_url: self.base_url.clone(),
            request_timeout_secs: self.request_timeout_secs,
        }
    }
}

/// Local handle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Origin that issued handles are scoped to
    #[serde(default = "default_origin")]
    pub origin: String,
}

fn default_origin() -> String {
    "http://localhost:3000".to_string()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("synergym").join("config.toml")),
            Some(PathBuf::from("/etc/synergym/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Backend overrides
        if let Ok(url) = std::env::var("SYNERGYM_API_URL") {
            self.backend.base_url = url;
        }
        if let Ok(token) = std::env::var("SYNERGYM_API_TOKEN") {
            self.backend.token = Some(token);
        }
        if let Ok(timeout) = std::env::var("SYNERGYM_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.backend.request_timeout_secs = secs;
            }
        }

        // Media overrides
        if let Ok(origin) = std::env::var("SYNERGYM_ORIGIN") {
            self.media.origin = origin;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("SYNERGYM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SYNERGYM_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Synergym Media Configuration
#
# Environment variables override these settings:
# - SYNERGYM_API_URL
# - SYNERGYM_API_TOKEN
# - SYNERGYM_REQUEST_TIMEOUT
# - SYNERGYM_ORIGIN
# - SYNERGYM_LOG_LEVEL
# - SYNERGYM_LOG_FORMAT

[backend]
# Synergym REST API base URL
base_url = "http://localhost:8080/api"

# Bearer token for protected images (usually set via SYNERGYM_API_TOKEN)
# token = ""

# Request timeout in seconds
request_timeout_secs = 30

[media]
# Origin that local handles (blob: URLs) are issued under
origin = "http://localhost:3000"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
