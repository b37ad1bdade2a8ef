//! Error types for the content-addressed store

use std::io;
use std::path::PathBuf;

use slotstore_core::ConfigError;
use thiserror::Error;

use crate::record_store::RecordId;

/// Result type for content store operations
pub type Result<T> = std::result::Result<T, ContentStoreError>;

/// Content store errors
#[derive(Debug, Error)]
pub enum ContentStoreError {
    /// Mutation attempted on a store opened read-only
    #[error("Content store {} is opened read-only", .path.display())]
    ReadOnly {
        /// File or directory that was opened read-only
        path: PathBuf,
    },

    /// No record with this id exists
    #[error("Record {0} not found")]
    RecordNotFound(RecordId),

    /// A record's payload does not match its stored checksum
    #[error("Record {id} is corrupted: {reason}")]
    Corrupted {
        /// Record id
        id: RecordId,
        /// What failed to verify
        reason: String,
    },

    /// Record allocation protocol violated
    #[error("Invalid record state: {0}")]
    InvalidRecordState(String),

    /// Hash index and record store disagree and the store cannot rebuild
    #[error("Hash index holds {hashes} entries but record store holds {records}; open read-write to rebuild")]
    InconsistentIndex {
        /// Entries in the hash index
        hashes: usize,
        /// Records in the record store
        records: usize,
    },

    /// Operation on a closed store
    #[error("Content store is closed")]
    Closed,

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ContentStoreError {
    /// Check if the store content itself failed verification
    pub fn is_corruption(&self) -> bool {
        matches!(self, ContentStoreError::Corrupted { .. })
            || matches!(self, ContentStoreError::Io(e) if e.kind() == io::ErrorKind::InvalidData)
    }
}

pub(crate) fn invalid_data(msg: impl Into<String>) -> ContentStoreError {
    ContentStoreError::Io(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
}
