//! Durable array as a root pointer into a content store.
//!
//! Blobs go into the content store; the durable array holds the id of the
//! current blob plus a generation counter. Because the store is flushed
//! before the pointer commit, a recovered pointer always resolves.

use crate::common::{decode_pointer, encode_pointer, TestDir, POINTER_SIZE};
use slotstore::durability::testing::{CrashPoint, CrashType, FaultyFile};
use slotstore::{DiskFile, DurableByteArray, OpenMode};

fn blob(generation: u64) -> Vec<u8> {
    format!("catalog generation {}", generation % 3).into_bytes()
}

#[test]
fn test_pointer_always_resolves_after_reopen() {
    let test = TestDir::new();
    let array = test.open_array(OpenMode::ReadWrite, POINTER_SIZE);
    let store = test.open_store(OpenMode::ReadWrite);

    for generation in 1..=9u64 {
        let id = store.store_record(&blob(generation)).unwrap();
        store.flush().unwrap();
        array
            .commit_change(|bytes| encode_pointer(bytes, id, generation))
            .unwrap();
    }
    // Three distinct blobs, each referenced three times
    assert_eq!(store.record_count().unwrap(), 3);
    assert_eq!(store.stats().reused, 6);
    array.close().unwrap();
    store.close().unwrap();

    let array = test.open_array(OpenMode::Read, POINTER_SIZE);
    let store = test.open_store(OpenMode::Read);
    let (id, generation) = decode_pointer(&array.last_snapshot().unwrap());
    assert_eq!(generation, 9);
    assert_eq!(store.read_record(id).unwrap(), blob(9));
    assert_eq!(store.ref_count(id).unwrap(), 3);
}

#[test]
fn test_crashed_pointer_commit_keeps_previous_blob() {
    let test = TestDir::new();
    let array = test.open_array(OpenMode::ReadWrite, POINTER_SIZE);
    let store = test.open_store(OpenMode::ReadWrite);
    let first = store.store_record(b"first blob").unwrap();
    store.flush().unwrap();
    array
        .commit_change(|bytes| encode_pointer(bytes, first, 1))
        .unwrap();
    array.close().unwrap();

    let file = FaultyFile::new(
        DiskFile::open(test.state_path(), OpenMode::ReadWrite).unwrap(),
        CrashType::PowerLoss,
    )
    .crash_at(CrashPoint::BeforeMarkerWrite);
    let array = DurableByteArray::from_file(
        test.state_path(),
        Box::new(file),
        OpenMode::ReadWrite,
        POINTER_SIZE,
    )
    .unwrap();

    let second = store.store_record(b"second blob").unwrap();
    store.flush().unwrap();
    assert!(array
        .commit_change(|bytes| encode_pointer(bytes, second, 2))
        .is_err());
    drop(array);
    store.close().unwrap();

    let array = test.open_array(OpenMode::Read, POINTER_SIZE);
    let store = test.open_store(OpenMode::Read);
    let (id, generation) = decode_pointer(&array.last_snapshot().unwrap());
    assert_eq!((id, generation), (first, 1));
    assert_eq!(store.read_record(id).unwrap(), b"first blob");
    // The orphaned blob is still stored; records are never reclaimed
    assert_eq!(store.find_record(b"second blob").unwrap(), Some(second));
}
