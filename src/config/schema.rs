//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! engine. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Server settings (bind address, route prefix).
    pub server: ServerConfig,

    /// File upload settings.
    pub upload: UploadConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Prefix prepended to every registered route.
    pub global_prefix: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            global_prefix: None,
        }
    }
}

/// File upload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Enable the multipart upload parser.
    pub enabled: bool,

    /// Per-file size ceiling in bytes. 0 disables the ceiling.
    pub limit_bytes: u64,

    /// Directory temp files are written into.
    pub temp_dir: String,

    /// Delete temp files after `remove_delay_secs`.
    pub remove_temp_files: bool,

    /// Deferred deletion delay in seconds.
    pub remove_delay_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit_bytes: 0,
            temp_dir: "tmp".to_string(),
            remove_temp_files: false,
            remove_delay_secs: 10 * 60,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Emit one access-log event per completed request.
    pub access_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            access_log: false,
        }
    }
}
