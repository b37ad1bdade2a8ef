//! Error types shared by the slotstore crates

use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Retry attempts exceed the supported maximum
    #[error("Retry attempts {attempts} exceed maximum {max}")]
    TooManyRetryAttempts {
        /// Requested attempts
        attempts: u32,
        /// Maximum allowed
        max: u32,
    },
}
