//! Content-addressed record storage for slotstore
//!
//! This crate implements deduplicating storage of byte records:
//! - RecordStore: append-only, ref-counted record file with 1-based ids
//! - ContentHashEnumerator: persistent SHA-256 hash to record id bijection
//! - ContentStore: dedup adapter over both, with a self-healing hash index
//!
//! # Example
//!
//! ```no_run
//! use slotstore_storage::{ContentStore, ContentStoreConfig};
//!
//! let store = ContentStore::open("/tmp/cas", &ContentStoreConfig::default())?;
//! let id = store.store_record(b"payload")?;
//! assert_eq!(store.store_record(b"payload")?, id);
//! store.close()?;
//! # Ok::<(), slotstore_storage::ContentStoreError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod content_store;
pub mod error;
pub mod format;
pub mod hash_enumerator;
pub mod record_store;

pub use config::ContentStoreConfig;
pub use content_store::{ContentStore, ContentStoreStats, HASHES_FILE, RECORDS_FILE};
pub use error::{ContentStoreError, Result};
pub use slotstore_core::{ConfigError, MAX_RETRY_ATTEMPTS};
pub use hash_enumerator::{hash_content, ContentHash, ContentHashEnumerator, HASH_SIZE};
pub use record_store::{RecordId, RecordStore};
