//! Configuration types for Stowage
//!
//! This module defines configuration structures used across components.
//! Every field has a default so a partial TOML file is enough.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for Stowage
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log storage configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Resource health configuration
    #[serde(default)]
    pub cluster_map: ClusterMapConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.cluster_map.validate()
    }
}

/// Segmented log configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the segment files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Total capacity of the log in bytes
    #[serde(default = "default_log_capacity")]
    pub log_capacity: u64,
    /// Capacity of each segment in bytes
    #[serde(default = "default_segment_capacity")]
    pub segment_capacity: u64,
    /// How long `close` waits for outstanding segment references (milliseconds)
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_capacity: default_log_capacity(),
            segment_capacity: default_segment_capacity(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Close timeout as a [`Duration`]
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Number of segments the log may hold
    #[must_use]
    pub const fn max_segments(&self) -> u64 {
        self.log_capacity / self.segment_capacity
    }

    fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::configuration("store.data_dir must not be empty"));
        }
        if self.segment_capacity == 0 {
            return Err(Error::configuration("store.segment_capacity must be > 0"));
        }
        if self.log_capacity < self.segment_capacity {
            return Err(Error::configuration(format!(
                "store.log_capacity {} is smaller than store.segment_capacity {}",
                self.log_capacity, self.segment_capacity
            )));
        }
        if self.log_capacity % self.segment_capacity != 0 {
            return Err(Error::configuration(format!(
                "store.log_capacity {} is not a multiple of store.segment_capacity {}",
                self.log_capacity, self.segment_capacity
            )));
        }
        Ok(())
    }
}

/// Failure tracking for remote resources
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterMapConfig {
    /// Consecutive errors before a resource is considered down
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long a resource stays down once the threshold is hit (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ClusterMapConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ClusterMapConfig {
    /// Retry backoff as a [`Duration`]
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::configuration(
                "cluster_map.failure_threshold must be > 0",
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./stowage-data")
}

const fn default_log_capacity() -> u64 {
    16 * 1024 * 1024 * 1024 // 16 GB
}

const fn default_segment_capacity() -> u64 {
    512 * 1024 * 1024 // 512 MB
}

const fn default_close_timeout_ms() -> u64 {
    10_000
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}
