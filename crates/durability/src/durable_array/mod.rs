//! Crash-consistent double-buffered byte array.
//!
//! A `DurableByteArray` holds a fixed-size byte blob in a single file with
//! two instance slots (see [`crate::format::layout`]). One slot is current;
//! each commit writes the other slot and then flips the marker, so at every
//! instant at least one slot holds a complete, checksum-valid state.
//!
//! # Commit Protocol
//!
//! ```text
//! target = slot not currently holding the state
//! 1. checksum[target] = INVALID_CHECKSUM
//! 2. payload[target]  = new state
//! 3. flush                               (barrier #1)
//! 4. checksum[target] = crc32(new state)
//! 5. marker           = target
//! 6. flush                               (barrier #2)
//! 7. publish new state in memory
//! ```
//!
//! A crash before barrier #2 completes recovers the previous state: the marker
//! still selects the old slot, or the target slot fails its checksum and
//! recovery falls back. A failure at any step leaves the in-memory state at
//! the previous value, so `commit_change` can be retried as a whole.
//!
//! # Recovery
//!
//! On open the slot selected by the marker is validated against its checksum;
//! on mismatch the other slot is tried. An unrecognized marker is logged and
//! treated as the first slot. If neither slot validates, open fails with
//! [`DurableArrayError::Corrupted`].
//!
//! # Concurrency
//!
//! All state is guarded by one mutex per instance. Commits are fully
//! serialized, and `last_snapshot` observes either the pre- or post-commit
//! state. Only one instance may hold a given path open for writing; this is
//! not enforced by file locking.

mod config;
mod error;

pub use config::DurableArrayConfig;
pub use slotstore_core::{ConfigError, MAX_RETRY_ATTEMPTS};
pub use error::{DurableArrayError, LayoutMismatch, Result};

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use slotstore_core::{crc32, with_retries, write_atomically, DiskFile, OpenMode, StorageFile};
use tracing::{debug, error, info, warn};

use crate::format::layout::{initial_image, LayoutHandler, Slot};
use crate::format::{INVALID_CHECKSUM, LAYOUT_VERSION, MAX_STATE_SIZE};

/// Cumulative commit counters.
///
/// These counters accumulate over the lifetime of the handle and are never
/// reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurableArrayCounters {
    /// Successful commits
    pub commits: u64,
    /// Durability barrier (sync/fsync) calls
    pub sync_calls: u64,
    /// Bytes written to the file, header fields included
    pub bytes_written: u64,
}

/// Where the state held after open came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    /// The file was absent and has just been created from the default value
    Created,
    /// The file was absent and the handle is read-only; nothing on disk
    InMemoryDefault,
    /// Recovered from an instance slot of an existing file
    Recovered(Slot),
}

/// Outcome of opening a durable byte array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// Where the state came from
    pub source: StateSource,
    /// The marked slot failed validation and the other slot was used
    pub used_fallback: bool,
    /// Raw marker value, if it was neither known mark
    pub unrecognized_marker: Option<u32>,
}

impl RecoveryInfo {
    fn created() -> Self {
        RecoveryInfo {
            source: StateSource::Created,
            used_fallback: false,
            unrecognized_marker: None,
        }
    }

    fn in_memory() -> Self {
        RecoveryInfo {
            source: StateSource::InMemoryDefault,
            used_fallback: false,
            unrecognized_marker: None,
        }
    }
}

#[derive(Debug)]
enum Backing {
    File(LayoutHandler),
    /// Read-only handle over an absent file
    Memory,
    Closed,
}

#[derive(Debug)]
struct Inner {
    current_state: Vec<u8>,
    stored_in_second_instance: bool,
    backing: Backing,
    counters: DurableArrayCounters,
}

/// Crash-consistent fixed-size byte array backed by one file.
#[derive(Debug)]
pub struct DurableByteArray {
    path: PathBuf,
    mode: OpenMode,
    state_size: usize,
    recovery: RecoveryInfo,
    inner: Mutex<Inner>,
}

impl DurableByteArray {
    /// Open with the default configuration.
    ///
    /// See [`DurableByteArray::open_with_config`].
    pub fn open<F>(
        path: impl AsRef<Path>,
        mode: OpenMode,
        size: usize,
        make_default: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Vec<u8>,
    {
        Self::open_with_config(
            path,
            mode,
            size,
            make_default,
            &DurableArrayConfig::default(),
        )
    }

    /// Open or create the array at `path`.
    ///
    /// - `size` must be in `1..=MAX_STATE_SIZE`, checked before any I/O.
    /// - Absent file, read-only: an in-memory handle seeded with
    ///   `make_default()`; the filesystem is not touched.
    /// - Absent file, read-write: the file is created atomically through
    ///   `<path>.init` with both slots holding `make_default()`.
    /// - Existing file: size, version and state size are validated, then the
    ///   last committed state is recovered.
    ///
    /// `make_default()` must return exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// - [`DurableArrayError::LayoutIncompatible`]: the file was written with
    ///   a different size, version or state size. The content is intact but
    ///   unusable by this caller.
    /// - [`DurableArrayError::Corrupted`]: neither slot passes checksum
    ///   validation. This is fatal: no committed state can be recovered, and
    ///   reopening will fail the same way until the file is removed or
    ///   replaced. It is never reported as a layout mismatch.
    pub fn open_with_config<F>(
        path: impl AsRef<Path>,
        mode: OpenMode,
        size: usize,
        make_default: F,
        config: &DurableArrayConfig,
    ) -> Result<Self>
    where
        F: FnOnce() -> Vec<u8>,
    {
        validate_state_size(size)?;
        config.validate()?;

        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let state = default_state(size, make_default)?;

            if mode.is_read_only() {
                debug!(path = %path.display(), size, "File absent, serving default state read-only");
                return Ok(Self::in_memory(path, state));
            }

            write_atomically(&path, &initial_image(&state), config.sync_parent_dir)?;
            info!(path = %path.display(), size, "Created durable byte array");

            let file = open_file(&path, mode, config)?;
            let mut array = Self::from_file(path, file, mode, size)?;
            array.recovery = RecoveryInfo::created();
            return Ok(array);
        }

        let file = open_file(&path, mode, config)?;
        Self::from_file(path, file, mode, size)
    }

    /// Open over an already-opened file holding an existing array.
    ///
    /// `path` is used for diagnostics only. The file is validated and
    /// recovered exactly as in [`DurableByteArray::open_with_config`].
    pub fn from_file(
        path: impl Into<PathBuf>,
        file: Box<dyn StorageFile>,
        mode: OpenMode,
        size: usize,
    ) -> Result<Self> {
        validate_state_size(size)?;

        let path = path.into();
        let mut layout = LayoutHandler::new(file, size);

        validate_layout(&mut layout, &path, size)?;
        let (current_state, slot, recovery) = recover(&mut layout, &path)?;

        debug!(
            path = %path.display(),
            slot = ?slot,
            used_fallback = recovery.used_fallback,
            "Opened durable byte array"
        );

        Ok(DurableByteArray {
            path,
            mode,
            state_size: size,
            recovery,
            inner: Mutex::new(Inner {
                current_state,
                stored_in_second_instance: slot == Slot::Second,
                backing: Backing::File(layout),
                counters: DurableArrayCounters::default(),
            }),
        })
    }

    fn in_memory(path: PathBuf, state: Vec<u8>) -> Self {
        DurableByteArray {
            path,
            mode: OpenMode::Read,
            state_size: state.len(),
            recovery: RecoveryInfo::in_memory(),
            inner: Mutex::new(Inner {
                current_state: state,
                stored_in_second_instance: false,
                backing: Backing::Memory,
                counters: DurableArrayCounters::default(),
            }),
        }
    }

    /// Copy of the last committed state.
    pub fn last_snapshot(&self) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        if matches!(inner.backing, Backing::Closed) {
            return Err(self.closed_error());
        }
        Ok(inner.current_state.clone())
    }

    /// Apply `modify` to a copy of the current state and commit it durably.
    ///
    /// Returns a copy of the new state. When this returns `Ok`, the new state
    /// survives a crash. On error the previous state stays current both in
    /// memory and on disk.
    pub fn commit_change<F>(&self, modify: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&mut [u8]),
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let layout = match &mut inner.backing {
            Backing::Closed => return Err(self.closed_error()),
            Backing::Memory => return Err(self.read_only_error()),
            Backing::File(_) if self.mode.is_read_only() => return Err(self.read_only_error()),
            Backing::File(layout) => layout,
        };

        let mut new_state = inner.current_state.clone();
        modify(&mut new_state);

        let target = Slot::from_second(!inner.stored_in_second_instance);
        write_instance(layout, &new_state, target, &mut inner.counters)?;

        inner.current_state = new_state;
        inner.stored_in_second_instance = target == Slot::Second;
        inner.counters.commits += 1;

        Ok(inner.current_state.clone())
    }

    /// Release the file handle.
    ///
    /// Later `last_snapshot`/`commit_change` calls fail with
    /// [`DurableArrayError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let backing = std::mem::replace(&mut inner.backing, Backing::Closed);
        if let Backing::File(mut layout) = backing {
            if !self.mode.is_read_only() {
                layout.flush()?;
            }
            debug!(path = %self.path.display(), "Closed durable byte array");
        }
        Ok(())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fixed state size in bytes
    pub fn state_size(&self) -> usize {
        self.state_size
    }

    /// Mode the array was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.lock().backing, Backing::Closed)
    }

    /// How the state was obtained when the array was opened
    pub fn recovery_info(&self) -> RecoveryInfo {
        self.recovery
    }

    /// Cumulative commit counters
    pub fn counters(&self) -> DurableArrayCounters {
        self.inner.lock().counters.clone()
    }

    fn closed_error(&self) -> DurableArrayError {
        DurableArrayError::Closed {
            path: self.path.clone(),
        }
    }

    fn read_only_error(&self) -> DurableArrayError {
        DurableArrayError::ReadOnly {
            path: self.path.clone(),
        }
    }
}

fn validate_state_size(size: usize) -> Result<()> {
    if size == 0 || size > MAX_STATE_SIZE {
        return Err(DurableArrayError::InvalidArgument(format!(
            "State size {} must be in [1, {}]",
            size, MAX_STATE_SIZE
        )));
    }
    Ok(())
}

fn default_state<F>(size: usize, make_default: F) -> Result<Vec<u8>>
where
    F: FnOnce() -> Vec<u8>,
{
    let state = make_default();
    if state.len() != size {
        return Err(DurableArrayError::InvalidArgument(format!(
            "Default value has {} bytes, expected {}",
            state.len(),
            size
        )));
    }
    Ok(state)
}

fn open_file(
    path: &Path,
    mode: OpenMode,
    config: &DurableArrayConfig,
) -> Result<Box<dyn StorageFile>> {
    let file = DiskFile::open(path, mode)?;
    Ok(with_retries(file, config.io_retry_attempts))
}

fn validate_layout(layout: &mut LayoutHandler, path: &Path, size: usize) -> Result<()> {
    let incompatible = |reason| DurableArrayError::LayoutIncompatible {
        path: path.to_path_buf(),
        reason,
    };

    let actual = layout.file_len()?;
    let expected = layout.full_size();
    if actual != expected {
        return Err(incompatible(LayoutMismatch::FileSize { expected, actual }));
    }

    let version = layout.read_version()?;
    if version != LAYOUT_VERSION {
        return Err(incompatible(LayoutMismatch::Version {
            expected: LAYOUT_VERSION,
            actual: version,
        }));
    }

    let stored_size = layout.read_size()?;
    if stored_size as usize != size {
        return Err(incompatible(LayoutMismatch::StateSize {
            expected: size as u64,
            actual: u64::from(stored_size),
        }));
    }

    Ok(())
}

fn recover(layout: &mut LayoutHandler, path: &Path) -> Result<(Vec<u8>, Slot, RecoveryInfo)> {
    let marker = layout.read_current_instance()?;
    let unrecognized_marker = match Slot::from_marker(marker) {
        Some(_) => None,
        None => {
            warn!(
                path = %path.display(),
                marker = %format!("{:#x}", marker),
                "Unrecognized instance marker, assuming first instance"
            );
            Some(marker)
        }
    };
    let current = Slot::from_marker(marker).unwrap_or(Slot::First);

    if let Some(state) = read_valid_state(layout, current)? {
        return Ok((
            state,
            current,
            RecoveryInfo {
                source: StateSource::Recovered(current),
                used_fallback: false,
                unrecognized_marker,
            },
        ));
    }

    let other = current.other();
    warn!(
        path = %path.display(),
        slot = ?current,
        "Current instance failed checksum validation, falling back to {:?}",
        other
    );

    if let Some(state) = read_valid_state(layout, other)? {
        return Ok((
            state,
            other,
            RecoveryInfo {
                source: StateSource::Recovered(other),
                used_fallback: true,
                unrecognized_marker,
            },
        ));
    }

    error!(path = %path.display(), "Both instances failed checksum validation");
    Err(DurableArrayError::Corrupted {
        path: path.to_path_buf(),
    })
}

fn read_valid_state(layout: &mut LayoutHandler, slot: Slot) -> Result<Option<Vec<u8>>> {
    let state = layout.read_state(slot)?;
    let stored = layout.read_checksum(slot)?;
    if crc32(&state) == stored {
        Ok(Some(state))
    } else {
        Ok(None)
    }
}

/// Write `state` into `target` and make it current. Order is load-bearing.
fn write_instance(
    layout: &mut LayoutHandler,
    state: &[u8],
    target: Slot,
    counters: &mut DurableArrayCounters,
) -> Result<()> {
    // Payload lands under an invalid checksum
    layout.write_checksum(INVALID_CHECKSUM, target)?;
    layout.write_state(state, target)?;
    layout.flush()?;
    counters.sync_calls += 1;

    // Validate and flip
    layout.write_checksum(crc32(state), target)?;
    layout.write_current_instance(target.marker())?;
    layout.flush()?;
    counters.sync_calls += 1;

    counters.bytes_written += state.len() as u64 + 8 + 8 + 4;
    Ok(())
}
