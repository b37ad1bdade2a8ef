//! Testing utilities for durable byte arrays
//!
//! This module provides tools for testing crash consistency:
//!
//! - **Crash Harness**: `FaultyFile` fails a chosen operation of the commit
//!   protocol, emulating process kills, power loss, or transient I/O errors
//! - **Corruption**: `SlotCorruptionTester` damages slots, checksums, markers
//!
//! # Example
//!
//! ```ignore
//! use slotstore_durability::testing::{CrashPoint, CrashType, FaultyFile, SlotCorruptionTester};
//!
//! let tester = SlotCorruptionTester::new("path/to/state.bin", 64);
//! tester.corrupt_payload(Slot::First)?;
//! ```

mod corruption;
mod crash_harness;

pub use corruption::SlotCorruptionTester;
pub use crash_harness::{CrashPoint, CrashType, DataState, FaultyFile};
