//! Atomic file creation
//!
//! New files are written in full to a sibling `<path>.init`, synced, and then
//! renamed over `path`. A crash before the rename leaves only the `.init`
//! file behind (overwritten by the next attempt); a crash after the rename
//! leaves a complete file. The real path never holds partial content.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::file::{DiskFile, StorageFile};

/// Suffix appended to the full file name of the temporary creation file
pub const INIT_SUFFIX: &str = ".init";

/// Sibling temporary path used while creating `path`: `<path>.init`
pub fn init_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(INIT_SUFFIX);
    PathBuf::from(name)
}

/// Write `contents` to `path` atomically (write `.init`, sync, rename).
///
/// When `sync_parent` is set the parent directory is synced after the rename
/// so the new directory entry is durable too.
pub fn write_atomically(path: &Path, contents: &[u8], sync_parent: bool) -> io::Result<()> {
    let temp_path = init_path(path);

    if temp_path.exists() {
        debug!(path = %temp_path.display(), "Overwriting stale init file");
    }

    let mut file = DiskFile::create(&temp_path)?;
    file.write_all_at(0, contents)?;
    file.sync()?;
    drop(file);

    std::fs::rename(&temp_path, path)?;

    if sync_parent {
        sync_parent_dir(path)?;
    }

    Ok(())
}

/// Sync the directory containing `path`.
///
/// On platforms where directories cannot be opened as files this is a no-op.
pub fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if cfg!(unix) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}
