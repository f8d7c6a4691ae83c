//! Store configuration via `revstore.toml`
//!
//! A default `revstore.toml` can be written next to the application's data.
//! To change settings, edit the file and reopen the basis.

use revstore_concurrency::ConsistencyConfig;
use revstore_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "revstore.toml";

/// Store configuration loaded from `revstore.toml`.
///
/// # Example
///
/// ```toml
/// value_load_timeout_ms = 300
/// artifact_cache_capacity = 10000
///
/// [consistency]
/// max_attempts = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevStoreConfig {
    /// How long a reader waits for another thread's value load, in milliseconds.
    #[serde(default = "default_value_load_timeout_ms")]
    pub value_load_timeout_ms: u64,
    /// Artifact handle states kept in memory.
    #[serde(default = "default_handle_capacity")]
    pub artifact_cache_capacity: usize,
    /// Revision handle states kept in memory.
    #[serde(default = "default_handle_capacity")]
    pub revision_cache_capacity: usize,
    /// Loaded attribute values kept per revision and access strategy.
    #[serde(default = "default_value_cache_capacity")]
    pub value_cache_capacity: usize,
    /// Reject write transactions.
    #[serde(default)]
    pub read_only: bool,
    /// Retry policy for transiently inconsistent reads.
    #[serde(default)]
    pub consistency: ConsistencyConfig,
}

fn default_value_load_timeout_ms() -> u64 {
    300
}

fn default_handle_capacity() -> usize {
    10_000
}

fn default_value_cache_capacity() -> usize {
    512
}

impl Default for RevStoreConfig {
    fn default() -> Self {
        Self {
            value_load_timeout_ms: default_value_load_timeout_ms(),
            artifact_cache_capacity: default_handle_capacity(),
            revision_cache_capacity: default_handle_capacity(),
            value_cache_capacity: default_value_cache_capacity(),
            read_only: false,
            consistency: ConsistencyConfig::default(),
        }
    }
}

impl RevStoreConfig {
    /// Value load wait bound as a `Duration`
    pub fn value_load_timeout(&self) -> Duration {
        Duration::from_millis(self.value_load_timeout_ms)
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.value_load_timeout_ms == 0 {
            return Err(Error::Config(
                "value_load_timeout_ms must be greater than 0".into(),
            ));
        }
        for (name, value) in [
            ("artifact_cache_capacity", self.artifact_cache_capacity),
            ("revision_cache_capacity", self.revision_cache_capacity),
            ("value_cache_capacity", self.value_cache_capacity),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        self.consistency.validate()
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# revstore configuration
#
# How long a reader waits for another thread loading the same value (ms).
# After the timeout the reader loads the value itself.
value_load_timeout_ms = 300

# Handle states kept in memory. Evicted states are reloaded on demand.
artifact_cache_capacity = 10000
revision_cache_capacity = 10000

# Loaded attribute values kept per revision.
value_cache_capacity = 512

# Reject write transactions.
read_only = false

# Retry policy for reads that race a commit.
[consistency]
max_attempts = 5
base_delay_ms = 1
max_delay_ms = 50
"#
    }

    /// Parse and validate config text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RevStoreConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
