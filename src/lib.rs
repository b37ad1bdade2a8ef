//! Slotstore - crash-consistent small-state persistence
//!
//! Slotstore provides two storage building blocks:
//!
//! - [`DurableByteArray`]: a fixed-size byte array persisted with a
//!   double-buffered, checksummed file layout. A commit either fully lands or
//!   leaves the previously committed state intact, across process kills and
//!   power loss.
//! - [`ContentStore`]: a content-addressed, reference-counted record store
//!   that deduplicates byte records by SHA-256 hash.
//!
//! # Quick Start
//!
//! ```no_run
//! use slotstore::{DurableByteArray, OpenMode};
//!
//! let array = DurableByteArray::open("state.bin", OpenMode::ReadWrite, 8, || vec![0u8; 8])?;
//! let state = array.commit_change(|bytes| bytes[0] += 1)?;
//! assert_eq!(state[0], 1);
//! array.close()?;
//! # Ok::<(), slotstore::DurableArrayError>(())
//! ```

pub use slotstore_core::{ConfigError, DiskFile, OpenMode, RetryingFile, StorageFile};
pub use slotstore_durability::{
    DurableArrayConfig, DurableArrayCounters, DurableArrayError, DurableByteArray, RecoveryInfo,
    Slot, StateSource, MAX_STATE_SIZE,
};
pub use slotstore_storage::{
    ContentHash, ContentStore, ContentStoreConfig, ContentStoreError, ContentStoreStats, RecordId,
};

/// Lower-level building blocks, for custom file handles and testing
pub mod durability {
    pub use slotstore_durability::{format, testing};
}
