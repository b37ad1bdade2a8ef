//! Lifecycle through the root re-exports.

use crate::common::TestDir;
use slotstore::durability::testing::SlotCorruptionTester;
use slotstore::{DurableArrayError, OpenMode, Slot, StateSource};

#[test]
fn test_array_lifecycle_and_recovery_info() {
    let test = TestDir::new();

    let array = test.open_array(OpenMode::ReadWrite, 8);
    assert_eq!(array.recovery_info().source, StateSource::Created);
    array.commit_change(|bytes| bytes[0] = 1).unwrap();
    array.commit_change(|bytes| bytes[1] = 2).unwrap();
    assert_eq!(array.counters().commits, 2);
    array.close().unwrap();

    let array = test.open_array(OpenMode::Read, 8);
    assert_eq!(array.last_snapshot().unwrap(), vec![1, 2, 0, 0, 0, 0, 0, 0]);
    assert_eq!(
        array.recovery_info().source,
        StateSource::Recovered(Slot::First)
    );
    assert!(!array.recovery_info().used_fallback);
}

#[test]
fn test_fallback_visible_through_facade() {
    let test = TestDir::new();
    let array = test.open_array(OpenMode::ReadWrite, 8);
    array.commit_change(|bytes| bytes.fill(7)).unwrap();
    array.close().unwrap();

    let tester = SlotCorruptionTester::new(test.state_path(), 8);
    tester.corrupt_payload(Slot::Second).unwrap();

    let array = test.open_array(OpenMode::Read, 8);
    assert_eq!(array.last_snapshot().unwrap(), vec![0u8; 8]);
    assert!(array.recovery_info().used_fallback);
}

#[test]
fn test_read_only_array_of_absent_file() {
    let test = TestDir::new();

    let array = test.open_array(OpenMode::Read, 8);
    assert_eq!(array.recovery_info().source, StateSource::InMemoryDefault);
    assert!(matches!(
        array.commit_change(|bytes| bytes[0] = 1),
        Err(DurableArrayError::ReadOnly { .. })
    ));
    assert!(!test.state_path().exists());
}
