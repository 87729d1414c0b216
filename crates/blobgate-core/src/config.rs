//! Configuration management for BlobGate.
//!
//! All configuration is driven by environment variables. Process-level HTTP
//! tuning (timeouts, header limits) is left to the server binary.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Default maximum object size kept in memory before spilling to disk (512 KiB).
pub const DEFAULT_MAX_MEMORY_OBJECT_SIZE: usize = 524_288;

/// Default size of one backend part during downloads (16 MiB).
pub const DEFAULT_DOWNLOAD_PART_SIZE: usize = 16 * 1024 * 1024;

/// Default size of one chunk handed across a pipe (64 KiB).
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Global configuration for BlobGate.
///
/// # Examples
///
/// ```
/// use blobgate_core::config::BlobGateConfig;
///
/// let config = BlobGateConfig::default();
/// assert_eq!(config.gateway_listen, "0.0.0.0:8080");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct BlobGateConfig {
    /// Bind address for the gateway.
    #[builder(default = String::from("0.0.0.0:8080"))]
    pub gateway_listen: String,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,

    /// Maximum object size (in bytes) kept in memory before spilling to disk.
    #[builder(default = DEFAULT_MAX_MEMORY_OBJECT_SIZE)]
    pub max_memory_object_size: usize,

    /// Size (in bytes) of one backend part produced during a download.
    #[builder(default = DEFAULT_DOWNLOAD_PART_SIZE)]
    pub download_part_size: usize,

    /// Size (in bytes) of one chunk written across a transfer pipe.
    #[builder(default = DEFAULT_READ_CHUNK_SIZE)]
    pub read_chunk_size: usize,
}

impl Default for BlobGateConfig {
    fn default() -> Self {
        Self {
            gateway_listen: "0.0.0.0:8080".to_owned(),
            log_level: "info".to_owned(),
            max_memory_object_size: DEFAULT_MAX_MEMORY_OBJECT_SIZE,
            download_part_size: DEFAULT_DOWNLOAD_PART_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl BlobGateConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GATEWAY_LISTEN` | `0.0.0.0:8080` |
    /// | `LOG_LEVEL` | `info` |
    /// | `BLOB_MAX_MEMORY_OBJECT_SIZE` | `524288` |
    /// | `BLOB_DOWNLOAD_PART_SIZE` | `16777216` |
    /// | `BLOB_READ_CHUNK_SIZE` | `65536` |
    ///
    /// Unparseable or zero sizes fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("GATEWAY_LISTEN") {
            config.gateway_listen = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(n) = env_size("BLOB_MAX_MEMORY_OBJECT_SIZE") {
            config.max_memory_object_size = n;
        }
        if let Some(n) = env_size("BLOB_DOWNLOAD_PART_SIZE") {
            config.download_part_size = n;
        }
        if let Some(n) = env_size("BLOB_READ_CHUNK_SIZE") {
            config.read_chunk_size = n;
        }

        config
    }
}

fn env_size(name: &str) -> Option<usize> {
    std::env::var(name).ok().as_deref().and_then(parse_size)
}

/// Parse a positive byte size.
fn parse_size(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
