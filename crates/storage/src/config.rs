//! Content store configuration.

use slotstore_core::{validate_retry_attempts, ConfigError, OpenMode, DEFAULT_RETRY_ATTEMPTS};

/// Content store configuration parameters.
#[derive(Debug, Clone)]
pub struct ContentStoreConfig {
    /// Access mode for both store files (default: read-write).
    pub mode: OpenMode,

    /// Attempts per file operation for transient failures (default: 3).
    pub io_retry_attempts: u32,

    /// Sync both files after every `store_record` (default: false).
    ///
    /// When disabled, data reaches disk on `flush` or `close`.
    pub sync_on_store: bool,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        ContentStoreConfig {
            mode: OpenMode::ReadWrite,
            io_retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            sync_on_store: false,
        }
    }
}

impl ContentStoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set access mode (builder pattern).
    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set retry attempts (builder pattern).
    pub fn with_io_retry_attempts(mut self, attempts: u32) -> Self {
        self.io_retry_attempts = attempts;
        self
    }

    /// Set per-store sync (builder pattern).
    pub fn with_sync_on_store(mut self, sync: bool) -> Self {
        self.sync_on_store = sync;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_retry_attempts(self.io_retry_attempts)
    }

    /// Create a configuration for testing (read-write, no retries).
    pub fn for_testing() -> Self {
        ContentStoreConfig {
            mode: OpenMode::ReadWrite,
            io_retry_attempts: 1,
            sync_on_store: false,
        }
    }
}
