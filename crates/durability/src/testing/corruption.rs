//! Slot corruption testing utilities
//!
//! Provides utilities for damaging a durable byte array file in place to test
//! recovery robustness.
//!
//! # Corruption Types
//!
//! - Payload bit rot: flips bytes in one slot's payload
//! - Checksum damage: flips bits in one slot's stored checksum
//! - Marker overwrite: writes an arbitrary current-instance marker
//! - Version overwrite: writes an arbitrary layout version
//! - Truncation: removes bytes from the file tail
//!
//! # Example
//!
//! ```ignore
//! use slotstore_durability::testing::SlotCorruptionTester;
//!
//! let tester = SlotCorruptionTester::new("path/to/state.bin", 64);
//! tester.corrupt_payload(Slot::First)?;
//! // Recovery should fall back to the second slot
//! ```

use std::io;
use std::path::{Path, PathBuf};

use slotstore_core::{DiskFile, OpenMode, StorageFile};

use crate::format::layout::{LayoutHandler, Slot};

/// In-place corruption of a durable byte array file
pub struct SlotCorruptionTester {
    path: PathBuf,
    state_size: usize,
}

impl SlotCorruptionTester {
    /// Create a tester for the file at `path` with slots of `state_size` bytes
    pub fn new(path: impl AsRef<Path>, state_size: usize) -> Self {
        SlotCorruptionTester {
            path: path.as_ref().to_path_buf(),
            state_size,
        }
    }

    fn layout(&self) -> io::Result<LayoutHandler> {
        let file = DiskFile::open(&self.path, OpenMode::ReadWrite)?;
        Ok(LayoutHandler::new(Box::new(file), self.state_size))
    }

    /// Slot the marker currently selects, `None` if unrecognized
    pub fn current_slot(&self) -> io::Result<Option<Slot>> {
        Ok(Slot::from_marker(self.layout()?.read_current_instance()?))
    }

    /// Invert every byte of `slot`'s payload, leaving its checksum stale
    pub fn corrupt_payload(&self, slot: Slot) -> io::Result<()> {
        let mut layout = self.layout()?;
        let mut state = layout.read_state(slot)?;
        for byte in state.iter_mut() {
            *byte ^= 0xFF;
        }
        layout.write_state(&state, slot)?;
        layout.flush()
    }

    /// Flip the low bit of `slot`'s stored checksum
    pub fn corrupt_checksum(&self, slot: Slot) -> io::Result<()> {
        let mut layout = self.layout()?;
        let checksum = layout.read_checksum(slot)?;
        layout.write_checksum(checksum ^ 1, slot)?;
        layout.flush()
    }

    /// Overwrite `slot`'s payload with `state`, leaving its checksum untouched
    pub fn overwrite_payload(&self, slot: Slot, state: &[u8]) -> io::Result<()> {
        let mut layout = self.layout()?;
        layout.write_state(state, slot)?;
        layout.flush()
    }

    /// Overwrite the current-instance marker with a raw value
    pub fn write_marker(&self, marker: u32) -> io::Result<()> {
        let mut layout = self.layout()?;
        layout.write_current_instance(marker)?;
        layout.flush()
    }

    /// Overwrite the layout version with a raw value
    pub fn write_version(&self, version: u32) -> io::Result<()> {
        let mut file = DiskFile::open(&self.path, OpenMode::ReadWrite)?;
        file.write_all_at(0, &version.to_le_bytes())?;
        file.sync()
    }

    /// Remove `bytes_to_remove` bytes from the end of the file
    pub fn truncate_tail(&self, bytes_to_remove: u64) -> io::Result<u64> {
        let mut file = DiskFile::open(&self.path, OpenMode::ReadWrite)?;
        let new_len = file.len()?.saturating_sub(bytes_to_remove);
        file.set_len(new_len)?;
        file.sync()?;
        Ok(new_len)
    }
}
