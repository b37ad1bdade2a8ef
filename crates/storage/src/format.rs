//! On-disk file header shared by the record store and the hash index
//!
//! ```text
//! +------------------+
//! | Magic            | 4 bytes
//! | Format Version   | 4 bytes (u32 LE)
//! +------------------+
//! | entries...       |
//! ```
//!
//! A read-write open of a missing or header-less file (a crash right after
//! creation) writes a fresh header. Any other mismatch is reported as
//! `InvalidData`.

use std::io;
use std::path::Path;

use slotstore_core::{with_retries, DiskFile, OpenMode, StorageFile};

/// Size of the file header in bytes
pub const FILE_HEADER_SIZE: u64 = 8;

/// Record store magic bytes: "SSRS"
pub const RECORDS_MAGIC: [u8; 4] = *b"SSRS";

/// Hash index magic bytes: "SSHI"
pub const HASHES_MAGIC: [u8; 4] = *b"SSHI";

/// Current format version for both files
pub const FORMAT_VERSION: u32 = 1;

fn header_bytes(magic: [u8; 4]) -> [u8; FILE_HEADER_SIZE as usize] {
    let mut bytes = [0u8; FILE_HEADER_SIZE as usize];
    bytes[0..4].copy_from_slice(&magic);
    bytes[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes
}

/// Open a store file and validate (or initialize) its header.
///
/// Returns the file handle and its current length.
pub(crate) fn open_store_file(
    path: &Path,
    mode: OpenMode,
    magic: [u8; 4],
    retry_attempts: u32,
) -> io::Result<(Box<dyn StorageFile>, u64)> {
    let disk = if mode.is_read_only() {
        DiskFile::open(path, OpenMode::Read)?
    } else {
        DiskFile::open_or_create(path)?
    };
    let mut file = with_retries(disk, retry_attempts);
    let mut len = file.len()?;

    if len < FILE_HEADER_SIZE {
        if mode.is_read_only() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} has no file header", path.display()),
            ));
        }
        file.set_len(0)?;
        file.write_all_at(0, &header_bytes(magic))?;
        file.sync()?;
        len = FILE_HEADER_SIZE;
    } else {
        let mut header = [0u8; FILE_HEADER_SIZE as usize];
        file.read_exact_at(0, &mut header)?;
        if header[0..4] != magic {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} has invalid magic {:02x?}", path.display(), &header[0..4]),
            ));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} has format version {}, expected {}",
                    path.display(),
                    version,
                    FORMAT_VERSION
                ),
            ));
        }
    }

    Ok((file, len))
}
