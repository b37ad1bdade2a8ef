//! Core types for slotstore
//!
//! This crate defines the primitives shared by the durable byte array and the
//! content-addressed store:
//! - StorageFile: positioned read/write/sync file handle abstraction
//! - DiskFile: plain file implementation of StorageFile
//! - RetryingFile: decorator retrying transient I/O failures
//! - OpenMode: read-only vs read-write access
//! - ConfigError and retry limits shared by the store configurations
//! - Checksums: CRC32 helpers
//! - Atomic creation: write-to-`.init`-then-rename

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atomic;
pub mod checksum;
pub mod error;
pub mod file;
pub mod retry;

pub use atomic::{init_path, sync_parent_dir, write_atomically, INIT_SUFFIX};
pub use checksum::{crc32, crc32_u32};
pub use error::ConfigError;
pub use file::{DiskFile, OpenMode, StorageFile};
pub use retry::{
    validate_retry_attempts, with_retries, RetryingFile, DEFAULT_RETRY_ATTEMPTS, MAX_RETRY_ATTEMPTS,
};
