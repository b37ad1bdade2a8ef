//! Append-only, reference-counted record storage
//!
//! # Format
//!
//! After the file header, records are laid out back to back:
//!
//! ```text
//! +------------------+
//! | Payload Length   | 4 bytes (u32 LE)
//! | Ref Count        | 4 bytes (u32 LE)
//! | CRC32            | 4 bytes (u32 LE, over payload only)
//! | Payload          | variable
//! +------------------+
//! ```
//!
//! Record ids are 1-based positions in append order. Records are never
//! reclaimed, so an id stays valid for the lifetime of the file.
//!
//! Allocation is two-phase: `acquire_new_record` reserves the next id and
//! `write_record` appends its payload. Only one id can be pending at a time.

use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use slotstore_core::{crc32_u32, OpenMode, StorageFile};
use tracing::{debug, warn};

use crate::error::{ContentStoreError, Result};
use crate::format::{open_store_file, FILE_HEADER_SIZE, RECORDS_MAGIC};

/// Record identifier (1-based)
pub type RecordId = u32;

/// Size of the per-record header in bytes
pub const RECORD_HEADER_SIZE: u64 = 12;

/// Largest id handed out; ids must stay representable as positive `i32`
pub const MAX_RECORD_ID: RecordId = i32::MAX as RecordId;

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    len: u32,
    ref_count: u32,
    crc: u32,
}

impl RecordHeader {
    fn to_bytes(self) -> [u8; RECORD_HEADER_SIZE as usize] {
        let mut bytes = [0u8; RECORD_HEADER_SIZE as usize];
        bytes[0..4].copy_from_slice(&self.len.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.ref_count.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.crc.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; RECORD_HEADER_SIZE as usize]) -> Self {
        RecordHeader {
            len: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            ref_count: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            crc: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

/// Append-only record file with per-record reference counts
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    mode: OpenMode,
    file: Mutex<Box<dyn StorageFile>>,
    /// `offsets[id - 1]` is the file offset of record `id`
    offsets: Vec<u64>,
    end: u64,
    pending: Option<RecordId>,
}

impl RecordStore {
    /// Open or create the record file at `path`.
    ///
    /// Scans and verifies every record to rebuild the offset index. The scan
    /// stops at the first record that is incomplete, has a zero ref count
    /// (a zero-filled region left by a power loss) or fails its checksum;
    /// everything from there on is dropped and, in read-write mode,
    /// truncated from the file.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, retry_attempts: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (mut file, file_len) = open_store_file(&path, mode, RECORDS_MAGIC, retry_attempts)?;

        let mut offsets = Vec::new();
        let mut pos = FILE_HEADER_SIZE;
        while let Some(next) = scan_record(&mut *file, pos, file_len)? {
            offsets.push(pos);
            pos = next;
        }

        if pos < file_len {
            warn!(
                path = %path.display(),
                valid_len = pos,
                file_len,
                "Dropping torn record at end of record store"
            );
            if !mode.is_read_only() {
                file.set_len(pos)?;
                file.sync()?;
            }
        }

        debug!(path = %path.display(), records = offsets.len(), "Opened record store");

        Ok(RecordStore {
            path,
            mode,
            file: Mutex::new(file),
            offsets,
            end: pos,
            pending: None,
        })
    }

    /// Path of the record file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written
    pub fn record_count(&self) -> usize {
        self.offsets.len()
    }

    /// Reserve the id of the next record.
    ///
    /// The id must be passed to [`write_record`](Self::write_record) before
    /// another id can be acquired.
    pub fn acquire_new_record(&mut self) -> Result<RecordId> {
        self.check_writable()?;
        if let Some(pending) = self.pending {
            return Err(ContentStoreError::InvalidRecordState(format!(
                "record {} acquired but never written",
                pending
            )));
        }
        if self.offsets.len() >= MAX_RECORD_ID as usize {
            return Err(ContentStoreError::InvalidRecordState(
                "record id space exhausted".to_string(),
            ));
        }
        let id = self.offsets.len() as RecordId + 1;
        self.pending = Some(id);
        Ok(id)
    }

    /// Append the payload of the pending record `id` with a ref count of 1.
    ///
    /// On failure the reservation is released, nothing is indexed and the
    /// file is cut back to its previous end.
    pub fn write_record(&mut self, id: RecordId, bytes: &[u8]) -> Result<()> {
        self.check_writable()?;
        if self.pending != Some(id) {
            return Err(ContentStoreError::InvalidRecordState(format!(
                "record {} is not the pending record ({:?})",
                id, self.pending
            )));
        }
        self.pending = None;

        let len = u32::try_from(bytes.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record of {} bytes is too large", bytes.len()),
            )
        })?;
        let header = RecordHeader {
            len,
            ref_count: 1,
            crc: crc32_u32(bytes),
        };

        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE as usize + bytes.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(bytes);
        let file = self.file.get_mut();
        if let Err(e) = file.write_all_at(self.end, &buf) {
            if let Err(undo) = file.set_len(self.end) {
                warn!(
                    path = %self.path.display(),
                    error = %undo,
                    "Failed to cut back partial record append"
                );
            }
            return Err(e.into());
        }

        self.offsets.push(self.end);
        self.end += buf.len() as u64;
        Ok(())
    }

    /// Read and verify the payload of record `id`
    pub fn read_record(&self, id: RecordId) -> Result<Vec<u8>> {
        let offset = self.offset(id)?;
        let mut file = self.file.lock();
        read_at(&mut **file, offset).map_err(|e| match e {
            RecordReadError::Checksum { expected, actual } => ContentStoreError::Corrupted {
                id,
                reason: format!(
                    "checksum mismatch: expected {:#010x}, got {:#010x}",
                    expected, actual
                ),
            },
            RecordReadError::Io(e) => ContentStoreError::Io(e),
        })
    }

    /// Current reference count of record `id`
    pub fn ref_count(&self, id: RecordId) -> Result<u32> {
        let offset = self.offset(id)?;
        let mut header = [0u8; RECORD_HEADER_SIZE as usize];
        self.file.lock().read_exact_at(offset, &mut header)?;
        Ok(RecordHeader::from_bytes(&header).ref_count)
    }

    /// Increment the reference count of record `id`, returning the new count.
    ///
    /// Saturates at `u32::MAX`.
    pub fn increment_ref_count(&mut self, id: RecordId) -> Result<u32> {
        self.check_writable()?;
        let offset = self.offset(id)?;
        let file = self.file.get_mut();

        let mut count = [0u8; 4];
        file.read_exact_at(offset + 4, &mut count)?;
        let next = u32::from_le_bytes(count).saturating_add(1);
        file.write_all_at(offset + 4, &next.to_le_bytes())?;
        Ok(next)
    }

    /// Visit every record in id order, verifying each payload
    pub fn for_each_record<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(RecordId, &[u8]) -> Result<()>,
    {
        for id in 1..=self.offsets.len() as RecordId {
            let bytes = self.read_record(id)?;
            f(id, &bytes)?;
        }
        Ok(())
    }

    /// Sync appended records and ref count updates to disk
    pub fn flush(&mut self) -> Result<()> {
        if self.mode.is_read_only() {
            return Ok(());
        }
        self.file.get_mut().sync()?;
        Ok(())
    }

    /// Flush and release the file
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn offset(&self, id: RecordId) -> Result<u64> {
        if id == 0 {
            return Err(ContentStoreError::RecordNotFound(id));
        }
        self.offsets
            .get(id as usize - 1)
            .copied()
            .ok_or(ContentStoreError::RecordNotFound(id))
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode.is_read_only() {
            return Err(ContentStoreError::ReadOnly {
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

enum RecordReadError {
    Checksum { expected: u32, actual: u32 },
    Io(io::Error),
}

impl From<io::Error> for RecordReadError {
    fn from(e: io::Error) -> Self {
        RecordReadError::Io(e)
    }
}

/// Validate the record at `pos`, returning the offset just past it, or
/// `None` if no valid record starts there.
fn scan_record(file: &mut dyn StorageFile, pos: u64, file_len: u64) -> io::Result<Option<u64>> {
    if pos + RECORD_HEADER_SIZE > file_len {
        return Ok(None);
    }
    let mut header = [0u8; RECORD_HEADER_SIZE as usize];
    file.read_exact_at(pos, &mut header)?;
    let header = RecordHeader::from_bytes(&header);

    // Every written record starts with a ref count of 1
    if header.ref_count == 0 {
        return Ok(None);
    }
    let next = pos + RECORD_HEADER_SIZE + u64::from(header.len);
    if next > file_len {
        return Ok(None);
    }
    match read_at(file, pos) {
        Ok(_) => Ok(Some(next)),
        Err(RecordReadError::Checksum { .. }) => Ok(None),
        Err(RecordReadError::Io(e)) => Err(e),
    }
}

fn read_at(
    file: &mut dyn StorageFile,
    offset: u64,
) -> std::result::Result<Vec<u8>, RecordReadError> {
    let mut header = [0u8; RECORD_HEADER_SIZE as usize];
    file.read_exact_at(offset, &mut header)?;
    let header = RecordHeader::from_bytes(&header);

    let mut payload = vec![0u8; header.len as usize];
    file.read_exact_at(offset + RECORD_HEADER_SIZE, &mut payload)?;

    let actual = crc32_u32(&payload);
    if actual != header.crc {
        return Err(RecordReadError::Checksum {
            expected: header.crc,
            actual,
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotstore_core::DiskFile;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    /// Writes the first half of every write, then fails
    #[derive(Debug)]
    struct TornWrites(DiskFile);

    impl StorageFile for TornWrites {
        fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            self.0.read_exact_at(offset, buf)
        }

        fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
            self.0.write_all_at(offset, &data[..data.len() / 2])?;
            Err(io::Error::new(io::ErrorKind::Other, "torn write"))
        }

        fn sync(&mut self) -> io::Result<()> {
            self.0.sync()
        }

        fn len(&mut self) -> io::Result<u64> {
            self.0.len()
        }

        fn set_len(&mut self, len: u64) -> io::Result<()> {
            self.0.set_len(len)
        }
    }

    fn open(dir: &TempDir) -> RecordStore {
        RecordStore::open(dir.path().join("records.dat"), OpenMode::ReadWrite, 1).unwrap()
    }

    fn append(store: &mut RecordStore, bytes: &[u8]) -> RecordId {
        let id = store.acquire_new_record().unwrap();
        store.write_record(id, bytes).unwrap();
        id
    }

    #[test]
    fn test_ids_follow_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir);

        assert_eq!(append(&mut store, b"alpha"), 1);
        assert_eq!(append(&mut store, b""), 2);
        assert_eq!(append(&mut store, b"gamma"), 3);
        assert_eq!(store.record_count(), 3);

        assert_eq!(store.read_record(1).unwrap(), b"alpha");
        assert_eq!(store.read_record(2).unwrap(), b"");
        assert_eq!(store.read_record(3).unwrap(), b"gamma");
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir);
        append(&mut store, b"first");
        append(&mut store, b"second");
        store.increment_ref_count(2).unwrap();
        store.close().unwrap();

        let store = open(&dir);
        assert_eq!(store.record_count(), 2);
        assert_eq!(store.read_record(2).unwrap(), b"second");
        assert_eq!(store.ref_count(1).unwrap(), 1);
        assert_eq!(store.ref_count(2).unwrap(), 2);
    }

    #[test]
    fn test_write_requires_pending_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir);

        assert!(matches!(
            store.write_record(1, b"x"),
            Err(ContentStoreError::InvalidRecordState(_))
        ));

        let id = store.acquire_new_record().unwrap();
        assert!(matches!(
            store.acquire_new_record(),
            Err(ContentStoreError::InvalidRecordState(_))
        ));
        assert!(matches!(
            store.write_record(id + 1, b"x"),
            Err(ContentStoreError::InvalidRecordState(_))
        ));
        store.write_record(id, b"x").unwrap();
    }

    #[test]
    fn test_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir);
        append(&mut store, b"x");

        assert!(matches!(
            store.read_record(0),
            Err(ContentStoreError::RecordNotFound(0))
        ));
        assert!(matches!(
            store.read_record(2),
            Err(ContentStoreError::RecordNotFound(2))
        ));
        assert!(matches!(
            store.increment_ref_count(9),
            Err(ContentStoreError::RecordNotFound(9))
        ));
    }

    #[test]
    fn test_corrupted_payload_detected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let mut store = open(&dir);
        append(&mut store, b"payload-one");
        append(&mut store, b"payload-two");
        store.flush().unwrap();

        // Flip a byte inside the first payload behind the open store
        let mut bytes = std::fs::read(&path).unwrap();
        let pos = (FILE_HEADER_SIZE + RECORD_HEADER_SIZE) as usize;
        bytes[pos] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            store.read_record(1),
            Err(ContentStoreError::Corrupted { id: 1, .. })
        ));
        assert_eq!(store.read_record(2).unwrap(), b"payload-two");
    }

    #[test]
    fn test_scan_stops_at_first_bad_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let mut store = open(&dir);
        append(&mut store, b"payload-one");
        append(&mut store, b"payload-two");
        append(&mut store, b"payload-three");
        store.close().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let second = (FILE_HEADER_SIZE + 2 * RECORD_HEADER_SIZE) as usize + b"payload-one".len();
        bytes[second] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let store = open(&dir);
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.read_record(1).unwrap(), b"payload-one");
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            FILE_HEADER_SIZE + RECORD_HEADER_SIZE + b"payload-one".len() as u64
        );
    }

    #[test]
    fn test_zero_filled_tail_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let mut store = open(&dir);
        append(&mut store, b"");
        append(&mut store, b"hello");
        store.close().unwrap();
        let valid_len = std::fs::metadata(&path).unwrap().len();

        // Extended but never written: zero header, zero-length payload, CRC 0
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0u8; 36]).unwrap();
        drop(file);

        let mut store = open(&dir);
        assert_eq!(store.record_count(), 2);
        assert_eq!(store.read_record(1).unwrap(), b"");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), valid_len);
        assert_eq!(append(&mut store, b"next"), 3);
    }

    #[test]
    fn test_failed_append_cut_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let mut store = open(&dir);
        append(&mut store, b"kept");
        store.flush().unwrap();
        let valid_len = std::fs::metadata(&path).unwrap().len();

        store.file = Mutex::new(Box::new(TornWrites(
            DiskFile::open(&path, OpenMode::ReadWrite).unwrap(),
        )));
        let id = store.acquire_new_record().unwrap();
        assert!(store.write_record(id, &[7u8; 64]).is_err());

        assert_eq!(store.record_count(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), valid_len);
        // The reservation was released
        assert_eq!(store.acquire_new_record().unwrap(), 2);
    }

    #[test]
    fn test_torn_tail_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let mut store = open(&dir);
        append(&mut store, b"complete");
        store.close().unwrap();
        let valid_len = std::fs::metadata(&path).unwrap().len();

        // Header claims 100 bytes, only 3 follow
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        file.write_all(b"abc").unwrap();
        drop(file);

        let mut store = open(&dir);
        assert_eq!(store.record_count(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), valid_len);

        assert_eq!(append(&mut store, b"next"), 2);
        assert_eq!(store.read_record(2).unwrap(), b"next");
    }

    #[test]
    fn test_torn_last_payload_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let mut store = open(&dir);
        append(&mut store, b"kept");
        append(&mut store, b"torn-record");
        store.close().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let store = open(&dir);
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.read_record(1).unwrap(), b"kept");
    }

    #[test]
    fn test_read_only_refuses_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let mut store = open(&dir);
        append(&mut store, b"x");
        store.close().unwrap();

        let mut store = RecordStore::open(&path, OpenMode::Read, 1).unwrap();
        assert_eq!(store.read_record(1).unwrap(), b"x");
        assert!(matches!(
            store.acquire_new_record(),
            Err(ContentStoreError::ReadOnly { .. })
        ));
        assert!(matches!(
            store.increment_ref_count(1),
            Err(ContentStoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn test_for_each_record_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir);
        for value in 0..5u8 {
            append(&mut store, &[value; 3]);
        }

        let mut seen = Vec::new();
        store
            .for_each_record(|id, bytes| {
                seen.push((id, bytes[0]));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(1, 0), (2, 1), (3, 2), (4, 3), (5, 4)]);
    }
}
