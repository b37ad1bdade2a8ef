//! Durable byte array error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use slotstore_core::ConfigError;

/// Result type alias for durable byte array operations
pub type Result<T> = std::result::Result<T, DurableArrayError>;

/// Errors that can occur while opening or using a durable byte array
#[derive(Debug, Error)]
pub enum DurableArrayError {
    /// Caller passed an out-of-range size or a default value of the wrong length
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Existing file does not match the requested layout.
    ///
    /// The caller may delete the file and recreate it; this is never handled
    /// internally.
    #[error("Incompatible layout in {}: {reason}", .path.display())]
    LayoutIncompatible {
        /// File that was opened
        path: PathBuf,
        /// Which check failed
        reason: LayoutMismatch,
    },

    /// Neither instance slot passed checksum validation
    #[error("Both instances of {} failed checksum validation; file is corrupted", .path.display())]
    Corrupted {
        /// File that was opened
        path: PathBuf,
    },

    /// Mutation attempted on a read-only handle
    #[error("{} is opened read-only", .path.display())]
    ReadOnly {
        /// File that was opened
        path: PathBuf,
    },

    /// Operation attempted after close
    #[error("{} is already closed", .path.display())]
    Closed {
        /// File that was opened
        path: PathBuf,
    },

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),

    /// IO error, propagated unmodified
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DurableArrayError {
    /// Whether the file exists but was written with an incompatible layout
    pub fn is_layout_incompatible(&self) -> bool {
        matches!(self, DurableArrayError::LayoutIncompatible { .. })
    }
}

/// Layout check that failed when opening an existing file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutMismatch {
    /// File length differs from header + two slots
    #[error("file size is {actual}, expected {expected}")]
    FileSize {
        /// Expected file size
        expected: u64,
        /// Actual file size
        actual: u64,
    },

    /// Stored layout version differs
    #[error("layout version is {actual}, expected {expected}")]
    Version {
        /// Supported version
        expected: u32,
        /// Version found in the file
        actual: u32,
    },

    /// Stored state size differs from the requested size
    #[error("state size is {actual}, expected {expected}")]
    StateSize {
        /// Requested state size
        expected: u64,
        /// State size found in the file
        actual: u64,
    },
}
