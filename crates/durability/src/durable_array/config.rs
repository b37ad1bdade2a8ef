//! Durable byte array configuration.

use slotstore_core::{validate_retry_attempts, ConfigError, DEFAULT_RETRY_ATTEMPTS};

/// Durable byte array configuration parameters.
#[derive(Debug, Clone)]
pub struct DurableArrayConfig {
    /// Attempts per file operation for transient failures (default: 3).
    ///
    /// Values of 0 or 1 open the file without the retrying decorator.
    pub io_retry_attempts: u32,

    /// Sync the parent directory after the creation rename (default: true).
    pub sync_parent_dir: bool,
}

impl Default for DurableArrayConfig {
    fn default() -> Self {
        DurableArrayConfig {
            io_retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            sync_parent_dir: true,
        }
    }
}

impl DurableArrayConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set retry attempts (builder pattern).
    pub fn with_io_retry_attempts(mut self, attempts: u32) -> Self {
        self.io_retry_attempts = attempts;
        self
    }

    /// Set parent directory sync (builder pattern).
    pub fn with_sync_parent_dir(mut self, sync: bool) -> Self {
        self.sync_parent_dir = sync;
        self
    }

    /// Whether files are wrapped in the retrying decorator
    pub fn retries_enabled(&self) -> bool {
        self.io_retry_attempts > 1
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_retry_attempts(self.io_retry_attempts)
    }

    /// Create a configuration for testing (no retries, no directory sync).
    pub fn for_testing() -> Self {
        DurableArrayConfig {
            io_retry_attempts: 1,
            sync_parent_dir: false,
        }
    }
}
