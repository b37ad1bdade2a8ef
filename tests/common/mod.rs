//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use slotstore::{
    ContentStore, ContentStoreConfig, DurableArrayConfig, DurableByteArray, OpenMode, RecordId,
};
use tempfile::TempDir;

/// Size of the pointer state used by the catalog scenario
pub const POINTER_SIZE: usize = 16;

/// Scratch directory holding one durable array and one content store
pub struct TestDir {
    pub dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        TestDir {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join("state.bin")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join("cas")
    }

    pub fn open_array(&self, mode: OpenMode, size: usize) -> DurableByteArray {
        DurableByteArray::open_with_config(
            self.state_path(),
            mode,
            size,
            || vec![0u8; size],
            &DurableArrayConfig::for_testing(),
        )
        .expect("Failed to open durable array")
    }

    pub fn open_store(&self, mode: OpenMode) -> ContentStore {
        ContentStore::open(
            self.store_dir(),
            &ContentStoreConfig::for_testing().with_mode(mode),
        )
        .expect("Failed to open content store")
    }
}

/// Pointer state: `[record id u32][pad u32][generation u64]`, little-endian
pub fn encode_pointer(bytes: &mut [u8], id: RecordId, generation: u64) {
    bytes[0..4].copy_from_slice(&id.to_le_bytes());
    bytes[4..8].fill(0);
    bytes[8..16].copy_from_slice(&generation.to_le_bytes());
}

pub fn decode_pointer(bytes: &[u8]) -> (RecordId, u64) {
    let mut id = [0u8; 4];
    id.copy_from_slice(&bytes[0..4]);
    let mut generation = [0u8; 8];
    generation.copy_from_slice(&bytes[8..16]);
    (u32::from_le_bytes(id), u64::from_le_bytes(generation))
}
