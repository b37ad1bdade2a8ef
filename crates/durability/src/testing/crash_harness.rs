//! Crash harness for the durable byte array commit protocol
//!
//! [`FaultyFile`] wraps a [`StorageFile`] and fails the N-th mutating
//! operation (write or sync), simulating a crash at that point of the commit
//! protocol. Reads are not counted.
//!
//! # Crash Points
//!
//! One commit performs six mutating operations, in order:
//!
//! | # | Operation                      | Crash point            |
//! |---|--------------------------------|------------------------|
//! | 0 | write invalid checksum         | `BeforeInvalidChecksum`|
//! | 1 | write payload                  | `BeforePayloadWrite`, `DuringPayloadWrite` |
//! | 2 | flush (barrier #1)             | `BeforeFirstFlush`     |
//! | 3 | write real checksum            | `BeforeChecksumWrite`  |
//! | 4 | write marker                   | `BeforeMarkerWrite`    |
//! | 5 | flush (barrier #2)             | `BeforeFinalFlush`     |
//!
//! # Example
//!
//! ```ignore
//! use slotstore_durability::testing::{CrashPoint, CrashType, FaultyFile};
//!
//! let file = FaultyFile::new(DiskFile::open(&path, OpenMode::ReadWrite)?, CrashType::PowerLoss)
//!     .crash_at(CrashPoint::BeforeMarkerWrite);
//! let array = DurableByteArray::from_file(&path, Box::new(file), OpenMode::ReadWrite, size)?;
//! assert!(array.commit_change(|b| b[0] = 1).is_err());
//! ```

use std::io;

use slotstore_core::StorageFile;

/// Types of crash simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashType {
    /// Process killed: writes issued before the crash reach the file
    ProcessKill,
    /// Power loss: writes not yet covered by a sync are lost
    PowerLoss,
    /// The operation fails once; the file keeps working afterwards
    TransientIoError,
}

impl CrashType {
    /// Get all crash types
    pub fn all() -> Vec<CrashType> {
        vec![
            CrashType::ProcessKill,
            CrashType::PowerLoss,
            CrashType::TransientIoError,
        ]
    }

    /// Get description of crash type
    pub fn description(&self) -> &'static str {
        match self {
            CrashType::ProcessKill => "Process kill - issued writes survive",
            CrashType::PowerLoss => "Power loss - unsynced writes are lost",
            CrashType::TransientIoError => "Transient I/O error - single operation fails",
        }
    }
}

/// Crash injection points in the commit protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// Before the target checksum is invalidated
    BeforeInvalidChecksum,
    /// After invalidation, before any payload byte is written
    BeforePayloadWrite,
    /// Payload write torn halfway
    DuringPayloadWrite,
    /// Payload written, first flush not done
    BeforeFirstFlush,
    /// First flush done, real checksum not written
    BeforeChecksumWrite,
    /// Checksum written, marker not flipped
    BeforeMarkerWrite,
    /// Marker flipped, final flush not done
    BeforeFinalFlush,
    /// Commit completed
    AfterFinalFlush,
}

impl CrashPoint {
    /// Get all crash points
    pub fn all() -> Vec<CrashPoint> {
        vec![
            CrashPoint::BeforeInvalidChecksum,
            CrashPoint::BeforePayloadWrite,
            CrashPoint::DuringPayloadWrite,
            CrashPoint::BeforeFirstFlush,
            CrashPoint::BeforeChecksumWrite,
            CrashPoint::BeforeMarkerWrite,
            CrashPoint::BeforeFinalFlush,
            CrashPoint::AfterFinalFlush,
        ]
    }

    /// Get description of crash point
    pub fn description(&self) -> &'static str {
        match self {
            CrashPoint::BeforeInvalidChecksum => "Before checksum invalidation",
            CrashPoint::BeforePayloadWrite => "Before payload write",
            CrashPoint::DuringPayloadWrite => "During payload write (torn)",
            CrashPoint::BeforeFirstFlush => "After payload write, before first flush",
            CrashPoint::BeforeChecksumWrite => "After first flush, before checksum write",
            CrashPoint::BeforeMarkerWrite => "After checksum write, before marker flip",
            CrashPoint::BeforeFinalFlush => "After marker flip, before final flush",
            CrashPoint::AfterFinalFlush => "After final flush",
        }
    }

    /// Index of the failing mutating operation within one commit.
    ///
    /// `None` for `AfterFinalFlush`: the commit completes.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            CrashPoint::BeforeInvalidChecksum => Some(0),
            CrashPoint::BeforePayloadWrite | CrashPoint::DuringPayloadWrite => Some(1),
            CrashPoint::BeforeFirstFlush => Some(2),
            CrashPoint::BeforeChecksumWrite => Some(3),
            CrashPoint::BeforeMarkerWrite => Some(4),
            CrashPoint::BeforeFinalFlush => Some(5),
            CrashPoint::AfterFinalFlush => None,
        }
    }

    /// Whether the failing write is partially applied
    pub fn is_torn(&self) -> bool {
        matches!(self, CrashPoint::DuringPayloadWrite)
    }

    /// Expected recovered state after a crash of `crash_type` at this point
    pub fn expected_data_state(&self, crash_type: CrashType) -> DataState {
        match (self, crash_type) {
            (CrashPoint::AfterFinalFlush, _) => DataState::Committed,
            // Marker and checksum reached the file without the final sync
            (CrashPoint::BeforeFinalFlush, CrashType::ProcessKill) => DataState::Committed,
            _ => DataState::Previous,
        }
    }
}

/// Expected state after recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState {
    /// The state before the interrupted commit
    Previous,
    /// The state the interrupted commit was writing
    Committed,
}

/// File wrapper failing the N-th mutating operation.
#[derive(Debug)]
pub struct FaultyFile<F> {
    inner: F,
    crash_type: CrashType,
    crash_at: Option<usize>,
    torn: bool,
    operations: usize,
    crashed: bool,
    /// Writes not yet covered by a sync (power-loss mode only)
    unsynced: Vec<(u64, Vec<u8>)>,
}

impl<F: StorageFile> FaultyFile<F> {
    /// Wrap `inner`; no crash is armed until [`FaultyFile::crash_at`].
    pub fn new(inner: F, crash_type: CrashType) -> Self {
        FaultyFile {
            inner,
            crash_type,
            crash_at: None,
            torn: false,
            operations: 0,
            crashed: false,
            unsynced: Vec::new(),
        }
    }

    /// Arm a crash at `point` of the next commit (builder pattern).
    pub fn crash_at(mut self, point: CrashPoint) -> Self {
        self.crash_at = point.operation_index().map(|i| self.operations + i);
        self.torn = point.is_torn();
        self
    }

    /// Arm a crash at the `index`-th mutating operation from now (builder pattern).
    pub fn crash_at_operation(mut self, index: usize) -> Self {
        self.crash_at = Some(self.operations + index);
        self.torn = false;
        self
    }

    /// Whether the simulated crash has happened
    pub fn has_crashed(&self) -> bool {
        self.crashed
    }

    /// Mutating operations seen so far
    pub fn operations(&self) -> usize {
        self.operations
    }

    fn crash_error() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "simulated crash")
    }

    /// Count one mutating operation; `true` if it is the armed one.
    fn trips(&mut self) -> bool {
        let index = self.operations;
        self.operations += 1;
        self.crash_at == Some(index)
    }

    fn apply_write(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        if self.crash_type == CrashType::PowerLoss {
            self.unsynced.push((offset, data.to_vec()));
            Ok(())
        } else {
            self.inner.write_all_at(offset, data)
        }
    }

    fn crash(&mut self) -> io::Error {
        match self.crash_type {
            CrashType::TransientIoError => {
                self.crash_at = None;
            }
            CrashType::ProcessKill => {
                self.crashed = true;
            }
            CrashType::PowerLoss => {
                self.crashed = true;
                self.unsynced.clear();
            }
        }
        Self::crash_error()
    }
}

impl<F: StorageFile> StorageFile for FaultyFile<F> {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = offset + buf.len() as u64;
        if end > self.len()? {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        buf.fill(0);
        let inner_len = self.inner.len()?;
        if offset < inner_len {
            let available = (end.min(inner_len) - offset) as usize;
            self.inner.read_exact_at(offset, &mut buf[..available])?;
        }

        // Overlay writes the inner file has not seen yet
        for (write_offset, data) in &self.unsynced {
            let write_end = write_offset + data.len() as u64;
            let from = offset.max(*write_offset);
            let to = end.min(write_end);
            if from < to {
                let dst = (from - offset) as usize..(to - offset) as usize;
                let src = (from - write_offset) as usize..(to - write_offset) as usize;
                buf[dst].copy_from_slice(&data[src]);
            }
        }
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        if self.crashed {
            return Err(Self::crash_error());
        }
        if self.trips() {
            if self.torn && self.crash_type == CrashType::ProcessKill {
                let half = data.len() / 2;
                self.inner.write_all_at(offset, &data[..half])?;
            }
            return Err(self.crash());
        }
        self.apply_write(offset, data)
    }

    fn sync(&mut self) -> io::Result<()> {
        if self.crashed {
            return Err(Self::crash_error());
        }
        if self.trips() {
            return Err(self.crash());
        }
        for (offset, data) in std::mem::take(&mut self.unsynced) {
            self.inner.write_all_at(offset, &data)?;
        }
        self.inner.sync()
    }

    fn len(&mut self) -> io::Result<u64> {
        if self.crashed {
            return Err(Self::crash_error());
        }
        let pending_end = self
            .unsynced
            .iter()
            .map(|(offset, data)| offset + data.len() as u64)
            .max()
            .unwrap_or(0);
        Ok(self.inner.len()?.max(pending_end))
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        if self.crashed {
            return Err(Self::crash_error());
        }
        self.inner.set_len(len)
    }
}
