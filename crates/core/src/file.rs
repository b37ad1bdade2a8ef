//! File handle abstraction
//!
//! All on-disk structures in slotstore perform positioned I/O through the
//! [`StorageFile`] trait. The default implementation is [`DiskFile`], a thin
//! wrapper over `std::fs::File`. Decorators (retry, fault injection) wrap any
//! other `StorageFile`.
//!
//! A `StorageFile` is exclusively owned by one structure and is closed when
//! dropped. There is no shared registry of open files.

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Access mode a structure is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Reads only. Mutations fail with an access error.
    Read,
    /// Reads and writes.
    ReadWrite,
}

impl OpenMode {
    /// Whether this mode forbids mutation
    pub fn is_read_only(&self) -> bool {
        matches!(self, OpenMode::Read)
    }
}

/// Positioned file I/O.
///
/// Every call is independent of any previous seek position, so callers reason
/// only in terms of absolute offsets.
pub trait StorageFile: Send + Sync + Debug {
    /// Fill `buf` from `offset`. Fails with `UnexpectedEof` on short files.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `data` starting at `offset`, extending the file if needed.
    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Durability barrier: force all previous writes to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Current file length in bytes.
    fn len(&mut self) -> io::Result<u64>;

    /// Truncate or extend the file to `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Whether the file is empty.
    fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl StorageFile for Box<dyn StorageFile> {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        (**self).write_all_at(offset, data)
    }

    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }

    fn len(&mut self) -> io::Result<u64> {
        (**self).len()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

/// Plain on-disk file.
#[derive(Debug)]
pub struct DiskFile {
    file: File,
    path: PathBuf,
    mode: OpenMode,
}

impl DiskFile {
    /// Open an existing file.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(!mode.is_read_only())
            .open(&path)?;
        Ok(DiskFile { file, path, mode })
    }

    /// Open a file for read-write, creating it if absent. Existing content is kept.
    pub fn open_or_create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(DiskFile {
            file,
            path,
            mode: OpenMode::ReadWrite,
        })
    }

    /// Create (or truncate) a file for read-write.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(DiskFile {
            file,
            path,
            mode: OpenMode::ReadWrite,
        })
    }

    /// Path this file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode this file was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.mode.is_read_only() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is opened read-only", self.path.display()),
            ));
        }
        Ok(())
    }
}

impl StorageFile for DiskFile {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn sync(&mut self) -> io::Result<()> {
        if self.mode.is_read_only() {
            return Ok(());
        }
        self.file.sync_all()
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.check_writable()?;
        self.file.set_len(len)
    }
}
