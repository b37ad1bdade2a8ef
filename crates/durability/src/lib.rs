//! Durability layer for slotstore
//!
//! This crate handles the crash-consistent byte array:
//!
//! - Layout: binary format of the 64-byte header plus two instance slots
//! - Durable byte array: open/recover/commit over the layout
//! - Configuration: retry decorator and directory sync settings
//! - Crash testing infrastructure: fault-injecting file, slot corruption

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod durable_array; // Open, recovery, commit protocol
pub mod format; // Binary on-disk layout
pub mod testing; // Crash harness and corruption tester

// === Re-exports ===
pub use durable_array::{
    ConfigError, DurableArrayConfig, DurableArrayCounters, DurableArrayError, DurableByteArray,
    LayoutMismatch, RecoveryInfo, StateSource,
};
pub use format::{
    Header, LayoutHandler, Slot, FIRST_INSTANCE_MARK, HEADER_SIZE, INVALID_CHECKSUM,
    LAYOUT_VERSION, MAX_STATE_SIZE, SECOND_INSTANCE_MARK,
};
pub use slotstore_core::OpenMode;

// Testing utilities
pub use testing::{CrashPoint, CrashType, DataState, FaultyFile, SlotCorruptionTester};
