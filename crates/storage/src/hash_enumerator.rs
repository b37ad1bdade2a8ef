//! Persistent bijection between content hashes and record ids
//!
//! The hash file stores one SHA-256 digest per id, in id order, after the
//! file header: the digest of record `id` lives at
//! `FILE_HEADER_SIZE + (id - 1) * HASH_SIZE`. The whole mapping is held in
//! memory for lookups.
//!
//! [`ContentHashEnumerator::enumerate`] encodes "already known" in the sign
//! of its result: `-id` for a known hash, a fresh positive `id` otherwise.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use slotstore_core::{OpenMode, StorageFile};
use tracing::{debug, warn};

use crate::error::{invalid_data, ContentStoreError, Result};
use crate::format::{open_store_file, FILE_HEADER_SIZE, HASHES_MAGIC};
use crate::record_store::{RecordId, MAX_RECORD_ID};

/// Size of a content hash in bytes
pub const HASH_SIZE: usize = 32;

/// SHA-256 digest of record content
pub type ContentHash = [u8; HASH_SIZE];

/// Compute the content hash of `bytes`
pub fn hash_content(bytes: &[u8]) -> ContentHash {
    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(&Sha256::digest(bytes));
    hash
}

/// Hash-to-id enumerator backed by an append-only hash file
#[derive(Debug)]
pub struct ContentHashEnumerator {
    path: PathBuf,
    mode: OpenMode,
    file: Box<dyn StorageFile>,
    ids: HashMap<ContentHash, RecordId>,
    hashes: Vec<ContentHash>,
}

impl ContentHashEnumerator {
    /// Open or create the hash file at `path`.
    ///
    /// A partially written trailing hash is dropped (and truncated in
    /// read-write mode). A hash listed twice is reported as `InvalidData`.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, retry_attempts: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (mut file, file_len) = open_store_file(&path, mode, HASHES_MAGIC, retry_attempts)?;

        let body_len = file_len - FILE_HEADER_SIZE;
        let count = (body_len / HASH_SIZE as u64) as usize;
        let valid_len = FILE_HEADER_SIZE + (count * HASH_SIZE) as u64;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "Dropping torn entry at end of hash index"
            );
            if !mode.is_read_only() {
                file.set_len(valid_len)?;
                file.sync()?;
            }
        }

        let mut body = vec![0u8; count * HASH_SIZE];
        file.read_exact_at(FILE_HEADER_SIZE, &mut body)?;

        let mut ids = HashMap::with_capacity(count);
        let mut hashes = Vec::with_capacity(count);
        for (index, chunk) in body.chunks_exact(HASH_SIZE).enumerate() {
            let mut hash = [0u8; HASH_SIZE];
            hash.copy_from_slice(chunk);
            let id = index as RecordId + 1;
            if let Some(previous) = ids.insert(hash, id) {
                return Err(invalid_data(format!(
                    "{}: hash of id {} repeats id {}",
                    path.display(),
                    id,
                    previous
                )));
            }
            hashes.push(hash);
        }

        debug!(path = %path.display(), entries = count, "Opened hash index");

        Ok(ContentHashEnumerator {
            path,
            mode,
            file,
            ids,
            hashes,
        })
    }

    /// Remove the hash file at `path`, if present
    pub fn delete_files(path: impl AsRef<Path>) -> io::Result<()> {
        match fs::remove_file(path.as_ref()) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Enumerate `hash`.
    ///
    /// Returns `-id` if the hash is already known, otherwise assigns the next
    /// id, appends the hash and returns the positive id.
    pub fn enumerate(&mut self, hash: &ContentHash) -> Result<i32> {
        if let Some(&id) = self.ids.get(hash) {
            return Ok(-(id as i32));
        }
        if self.mode.is_read_only() {
            return Err(ContentStoreError::ReadOnly {
                path: self.path.clone(),
            });
        }
        if self.hashes.len() >= MAX_RECORD_ID as usize {
            return Err(ContentStoreError::InvalidRecordState(
                "hash index id space exhausted".to_string(),
            ));
        }

        let id = self.hashes.len() as RecordId + 1;
        self.file.write_all_at(entry_offset(id), hash)?;
        self.ids.insert(*hash, id);
        self.hashes.push(*hash);
        Ok(id as i32)
    }

    /// Id assigned to `hash`, if known
    pub fn lookup(&self, hash: &ContentHash) -> Option<RecordId> {
        self.ids.get(hash).copied()
    }

    /// Hash enumerated as `id`, if any
    pub fn hash_of(&self, id: RecordId) -> Option<ContentHash> {
        if id == 0 {
            return None;
        }
        self.hashes.get(id as usize - 1).copied()
    }

    /// Number of enumerated hashes
    pub fn record_count(&self) -> usize {
        self.hashes.len()
    }

    /// Forget every id above `count`, in memory and on disk.
    ///
    /// Used to undo an enumeration whose record could not be written.
    pub fn truncate(&mut self, count: usize) -> Result<()> {
        if count >= self.hashes.len() {
            return Ok(());
        }
        for hash in self.hashes.drain(count..) {
            self.ids.remove(&hash);
        }
        self.file.set_len(entry_offset(count as RecordId + 1))?;
        Ok(())
    }

    /// Sync appended hashes to disk
    pub fn flush(&mut self) -> Result<()> {
        if self.mode.is_read_only() {
            return Ok(());
        }
        self.file.sync()?;
        Ok(())
    }

    /// Flush and release the file
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

fn entry_offset(id: RecordId) -> u64 {
    FILE_HEADER_SIZE + u64::from(id - 1) * HASH_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn open(path: &Path) -> ContentHashEnumerator {
        ContentHashEnumerator::open(path, OpenMode::ReadWrite, 1).unwrap()
    }

    #[test]
    fn test_hash_content_is_sha256() {
        let hash = hash_content(b"abc");
        assert_eq!(
            hash[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "SHA-256(\"abc\") starts with ba7816bf"
        );
    }

    #[test]
    fn test_enumerate_sign_convention() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = open(&dir.path().join("hashes.dat"));

        let a = hash_content(b"a");
        let b = hash_content(b"b");
        assert_eq!(index.enumerate(&a).unwrap(), 1);
        assert_eq!(index.enumerate(&b).unwrap(), 2);
        assert_eq!(index.enumerate(&a).unwrap(), -1);
        assert_eq!(index.enumerate(&b).unwrap(), -2);
        assert_eq!(index.record_count(), 2);

        assert_eq!(index.lookup(&a), Some(1));
        assert_eq!(index.lookup(&hash_content(b"c")), None);
        assert_eq!(index.hash_of(2), Some(b));
        assert_eq!(index.hash_of(0), None);
        assert_eq!(index.hash_of(3), None);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.dat");
        let mut index = open(&path);
        for value in 0..10u8 {
            index.enumerate(&hash_content(&[value])).unwrap();
        }
        index.close().unwrap();

        let mut index = open(&path);
        assert_eq!(index.record_count(), 10);
        assert_eq!(index.enumerate(&hash_content(&[7])).unwrap(), -8);
        assert_eq!(index.enumerate(&hash_content(&[10])).unwrap(), 11);
    }

    #[test]
    fn test_torn_entry_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.dat");
        let mut index = open(&path);
        index.enumerate(&hash_content(b"kept")).unwrap();
        index.close().unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 10]).unwrap();
        drop(file);

        let index = open(&path);
        assert_eq!(index.record_count(), 1);
        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            FILE_HEADER_SIZE + HASH_SIZE as u64
        );
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.dat");
        let mut index = open(&path);
        let hash = hash_content(b"dup");
        index.enumerate(&hash).unwrap();
        index.close().unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&hash).unwrap();
        drop(file);

        let err = ContentHashEnumerator::open(&path, OpenMode::ReadWrite, 1).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_truncate_forgets_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.dat");
        let mut index = open(&path);
        let a = hash_content(b"a");
        let b = hash_content(b"b");
        index.enumerate(&a).unwrap();
        index.enumerate(&b).unwrap();

        index.truncate(1).unwrap();
        assert_eq!(index.record_count(), 1);
        assert_eq!(index.lookup(&b), None);
        assert_eq!(index.enumerate(&b).unwrap(), 2);
    }

    #[test]
    fn test_read_only_known_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.dat");
        let mut index = open(&path);
        let known = hash_content(b"known");
        index.enumerate(&known).unwrap();
        index.close().unwrap();

        let mut index = ContentHashEnumerator::open(&path, OpenMode::Read, 1).unwrap();
        assert_eq!(index.enumerate(&known).unwrap(), -1);
        assert!(matches!(
            index.enumerate(&hash_content(b"new")),
            Err(ContentStoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn test_delete_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.dat");
        open(&path).close().unwrap();
        assert!(path.exists());

        ContentHashEnumerator::delete_files(&path).unwrap();
        assert!(!path.exists());
        ContentHashEnumerator::delete_files(&path).unwrap();
    }
}
