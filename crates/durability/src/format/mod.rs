//! On-disk byte formats.
//!
//! # Module Structure
//!
//! - `layout`: double-buffered byte array file (header + two instance slots)

pub mod layout;

pub use layout::{
    Header, LayoutHandler, Slot, FIRST_INSTANCE_MARK, HEADER_SIZE, INVALID_CHECKSUM,
    LAYOUT_VERSION, MAX_STATE_SIZE, SECOND_INSTANCE_MARK,
};
