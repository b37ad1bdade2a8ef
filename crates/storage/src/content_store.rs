//! Content-addressed record store
//!
//! Deduplicates byte records by SHA-256 content hash on top of a
//! ref-counted [`RecordStore`]. A [`ContentHashEnumerator`] maps each hash to
//! the id of the record holding that content; both are kept in one directory:
//!
//! ```text
//! <dir>/records.dat   record payloads + ref counts
//! <dir>/hashes.dat    hash index, one digest per record id
//! ```
//!
//! # Self-heal
//!
//! The hash index can be lost or damaged independently of the records. On
//! open, if the index is unreadable or its entry count differs from the
//! record count, it is rebuilt from the records. Rebuilding assigns ids in
//! record order, so every rebuilt id must equal the record's own id;
//! anything else means the store is inconsistent and open fails.
//!
//! # Concurrency
//!
//! The record store and the index form one unit behind a single
//! `parking_lot::RwLock`: `store_record`, `flush` and `close` take it
//! exclusively, lookups and reads share it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use slotstore_core::OpenMode;
use tracing::{debug, error, info, warn};

use crate::config::ContentStoreConfig;
use crate::error::{invalid_data, ContentStoreError, Result};
use crate::hash_enumerator::{hash_content, ContentHash, ContentHashEnumerator};
use crate::record_store::{RecordId, RecordStore};

/// Record file name inside the store directory
pub const RECORDS_FILE: &str = "records.dat";

/// Hash index file name inside the store directory
pub const HASHES_FILE: &str = "hashes.dat";

/// Store counters since open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentStoreStats {
    /// Records written for previously unseen content
    pub stored: u64,
    /// Stores answered with an existing record
    pub reused: u64,
}

#[derive(Debug)]
struct Stores {
    records: RecordStore,
    hashes: ContentHashEnumerator,
}

/// Deduplicating record store
#[derive(Debug)]
pub struct ContentStore {
    dir: PathBuf,
    config: ContentStoreConfig,
    inner: RwLock<Option<Stores>>,
    stored: AtomicU64,
    reused: AtomicU64,
}

impl ContentStore {
    /// Open (or create, in read-write mode) the store in `dir`.
    ///
    /// A read-only open of a store whose hash index is missing or out of
    /// sync fails with [`ContentStoreError::InconsistentIndex`]; rebuilding
    /// the index needs read-write access.
    pub fn open(dir: impl AsRef<Path>, config: &ContentStoreConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let read_only = config.mode.is_read_only();
        if !read_only {
            fs::create_dir_all(&dir)?;
        }

        let records = RecordStore::open(
            dir.join(RECORDS_FILE),
            config.mode,
            config.io_retry_attempts,
        )?;

        let hashes_path = dir.join(HASHES_FILE);
        let hashes = match ContentHashEnumerator::open(
            &hashes_path,
            config.mode,
            config.io_retry_attempts,
        ) {
            Ok(hashes) if hashes.record_count() == records.record_count() => hashes,
            Ok(hashes) if read_only => {
                return Err(ContentStoreError::InconsistentIndex {
                    hashes: hashes.record_count(),
                    records: records.record_count(),
                });
            }
            Ok(hashes) => {
                warn!(
                    dir = %dir.display(),
                    hashes = hashes.record_count(),
                    records = records.record_count(),
                    "Hash index out of sync with records, rebuilding"
                );
                drop(hashes);
                rebuild_index(&records, &hashes_path, config)?
            }
            Err(ContentStoreError::Io(e))
                if read_only && e.kind() == io::ErrorKind::NotFound =>
            {
                return Err(ContentStoreError::InconsistentIndex {
                    hashes: 0,
                    records: records.record_count(),
                });
            }
            Err(e) if !read_only && e.is_corruption() => {
                warn!(dir = %dir.display(), error = %e, "Hash index unreadable, rebuilding");
                rebuild_index(&records, &hashes_path, config)?
            }
            Err(e) => return Err(e),
        };

        debug!(dir = %dir.display(), records = records.record_count(), "Opened content store");

        Ok(ContentStore {
            dir,
            config: config.clone(),
            inner: RwLock::new(Some(Stores { records, hashes })),
            stored: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        })
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &ContentStoreConfig {
        &self.config
    }

    /// Store `bytes`, returning the id of the record holding them.
    ///
    /// Content seen before returns the existing id and bumps that record's
    /// ref count; new content is appended as a new record.
    pub fn store_record(&self, bytes: &[u8]) -> Result<RecordId> {
        if self.config.mode.is_read_only() {
            return Err(ContentStoreError::ReadOnly {
                path: self.dir.clone(),
            });
        }
        let hash = hash_content(bytes);

        let mut guard = self.inner.write();
        let stores = guard.as_mut().ok_or(ContentStoreError::Closed)?;

        let enumerated = stores.hashes.enumerate(&hash)?;
        let id = if enumerated < 0 {
            let id = enumerated.unsigned_abs();
            let refs = stores.records.increment_ref_count(id)?;
            self.reused.fetch_add(1, Ordering::Relaxed);
            debug!(id, refs, "Reused existing record");
            id
        } else {
            let id = enumerated as RecordId;
            if let Err(e) = append_record(&mut stores.records, id, bytes) {
                if let Err(undo) = stores.hashes.truncate(id as usize - 1) {
                    error!(id, error = %undo, "Failed to roll back hash index entry");
                }
                return Err(e);
            }
            self.stored.fetch_add(1, Ordering::Relaxed);
            id
        };

        if self.config.sync_on_store {
            stores.records.flush()?;
            stores.hashes.flush()?;
        }
        Ok(id)
    }

    /// Read the payload of record `id`
    pub fn read_record(&self, id: RecordId) -> Result<Vec<u8>> {
        let guard = self.inner.read();
        let stores = guard.as_ref().ok_or(ContentStoreError::Closed)?;
        stores.records.read_record(id)
    }

    /// Id of the record holding exactly `bytes`, if stored
    pub fn find_record(&self, bytes: &[u8]) -> Result<Option<RecordId>> {
        let hash = hash_content(bytes);
        let guard = self.inner.read();
        let stores = guard.as_ref().ok_or(ContentStoreError::Closed)?;
        Ok(stores.hashes.lookup(&hash))
    }

    /// Content hash of record `id`, if it exists
    pub fn content_hash(&self, id: RecordId) -> Result<Option<ContentHash>> {
        let guard = self.inner.read();
        let stores = guard.as_ref().ok_or(ContentStoreError::Closed)?;
        Ok(stores.hashes.hash_of(id))
    }

    /// Reference count of record `id`
    pub fn ref_count(&self, id: RecordId) -> Result<u32> {
        let guard = self.inner.read();
        let stores = guard.as_ref().ok_or(ContentStoreError::Closed)?;
        stores.records.ref_count(id)
    }

    /// Number of stored records
    pub fn record_count(&self) -> Result<usize> {
        let guard = self.inner.read();
        let stores = guard.as_ref().ok_or(ContentStoreError::Closed)?;
        Ok(stores.records.record_count())
    }

    /// Counters since open
    pub fn stats(&self) -> ContentStoreStats {
        ContentStoreStats {
            stored: self.stored.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
        }
    }

    /// Sync records, then the hash index, to disk
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let stores = guard.as_mut().ok_or(ContentStoreError::Closed)?;
        stores.records.flush()?;
        stores.hashes.flush()
    }

    /// Flush and release both files. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let Some(stores) = self.inner.write().take() else {
            return Ok(());
        };
        stores.records.close()?;
        stores.hashes.close()?;
        debug!(dir = %self.dir.display(), "Closed content store");
        Ok(())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }
}

fn append_record(records: &mut RecordStore, expected: RecordId, bytes: &[u8]) -> Result<()> {
    let id = records.acquire_new_record()?;
    if id != expected {
        return Err(invalid_data(format!(
            "hash index assigned id {} but record store is at {}",
            expected, id
        )));
    }
    records.write_record(id, bytes)
}

/// Recreate the hash index at `path` from every record in `records`
fn rebuild_index(
    records: &RecordStore,
    path: &Path,
    config: &ContentStoreConfig,
) -> Result<ContentHashEnumerator> {
    ContentHashEnumerator::delete_files(path)?;
    let mut hashes =
        ContentHashEnumerator::open(path, OpenMode::ReadWrite, config.io_retry_attempts)?;

    records.for_each_record(|id, bytes| {
        let enumerated = hashes.enumerate(&hash_content(bytes))?;
        if enumerated != id as i32 {
            return Err(invalid_data(format!(
                "rebuilding hash index: record {} enumerated as {}",
                id, enumerated
            )));
        }
        Ok(())
    })?;
    hashes.flush()?;

    info!(
        path = %path.display(),
        entries = hashes.record_count(),
        "Rebuilt content hash index"
    );
    Ok(hashes)
}
