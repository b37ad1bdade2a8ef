//! Double-buffered byte array file format.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (64 bytes)                            │
//! │   0: version            u32                  │
//! │   4: state size         u32                  │
//! │   8: current instance   u32 (marker)         │
//! │  12: reserved           4 bytes              │
//! │  16: checksum (first)   u64                  │
//! │  24: checksum (second)  u64                  │
//! │  32: reserved           32 bytes             │
//! ├──────────────────────────────────────────────┤
//! │ Instance 0 payload (state size bytes)        │
//! ├──────────────────────────────────────────────┤
//! │ Instance 1 payload (state size bytes)        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Integers are little-endian. The format is only read back by this crate.
//!
//! The [`LayoutHandler`] performs raw positioned I/O for each field. It does
//! not order writes or flush on its own; the commit protocol in
//! `durable_array` owns ordering and durability barriers.

use std::io;

use slotstore_core::StorageFile;

/// Current layout version
pub const LAYOUT_VERSION: u32 = 1;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 64;

/// Largest state size whose full file size still fits in an `i32`
pub const MAX_STATE_SIZE: usize = (i32::MAX as usize - HEADER_SIZE) / 2;

/// Marker value selecting the first instance slot
pub const FIRST_INSTANCE_MARK: u32 = 0x1a1a_1a1a;

/// Marker value selecting the second instance slot
pub const SECOND_INSTANCE_MARK: u32 = 0x2b2b_2b2b;

/// Checksum value no CRC32 can produce.
///
/// Written over a slot's checksum before its payload is rewritten, so a
/// partially written payload can never validate.
pub const INVALID_CHECKSUM: u64 = u64::MAX;

const VERSION_OFFSET: u64 = 0;
const SIZE_OFFSET: u64 = 4;
const CURRENT_INSTANCE_OFFSET: u64 = 8;
const CHECKSUM_FIRST_OFFSET: u64 = 16;
const CHECKSUM_SECOND_OFFSET: u64 = 24;

/// One of the two symmetric instance slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Instance 0
    First,
    /// Instance 1
    Second,
}

impl Slot {
    /// The slot that is not `self`
    pub fn other(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }

    /// Marker value written to the header when this slot is current
    pub fn marker(self) -> u32 {
        match self {
            Slot::First => FIRST_INSTANCE_MARK,
            Slot::Second => SECOND_INSTANCE_MARK,
        }
    }

    /// Decode a marker value, `None` if it is neither known mark
    pub fn from_marker(marker: u32) -> Option<Slot> {
        match marker {
            FIRST_INSTANCE_MARK => Some(Slot::First),
            SECOND_INSTANCE_MARK => Some(Slot::Second),
            _ => None,
        }
    }

    /// Slot for the `stored_in_second_instance` flag
    pub fn from_second(is_second: bool) -> Slot {
        if is_second {
            Slot::Second
        } else {
            Slot::First
        }
    }

    /// 0 for the first slot, 1 for the second
    pub fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }

    fn checksum_offset(self) -> u64 {
        match self {
            Slot::First => CHECKSUM_FIRST_OFFSET,
            Slot::Second => CHECKSUM_SECOND_OFFSET,
        }
    }
}

/// Decoded 64-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Layout version
    pub version: u32,
    /// Payload size of each slot
    pub state_size: u32,
    /// Raw current-instance marker (may be unrecognized)
    pub current_instance: u32,
    /// Checksum of instance 0
    pub checksum_first: u64,
    /// Checksum of instance 1
    pub checksum_second: u64,
}

impl Header {
    /// Serialize header to bytes. Reserved regions are zero.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.state_size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.current_instance.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.checksum_first.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.checksum_second.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Header {
            version: read_u32(&bytes[0..4]),
            state_size: read_u32(&bytes[4..8]),
            current_instance: read_u32(&bytes[8..12]),
            checksum_first: read_u64(&bytes[16..24]),
            checksum_second: read_u64(&bytes[24..32]),
        }
    }

    /// Stored checksum of `slot`
    pub fn checksum(&self, slot: Slot) -> u64 {
        match slot {
            Slot::First => self.checksum_first,
            Slot::Second => self.checksum_second,
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Total file size for a given state size: `HEADER_SIZE + 2 * state_size`
pub fn full_size_for(state_size: usize) -> u64 {
    HEADER_SIZE as u64 + 2 * state_size as u64
}

/// Complete initial file image: header plus both slots holding `state`.
///
/// Both slots carry the same checksum so either is a valid recovery source.
pub fn initial_image(state: &[u8]) -> Vec<u8> {
    let checksum = slotstore_core::crc32(state);
    let header = Header {
        version: LAYOUT_VERSION,
        state_size: state.len() as u32,
        current_instance: FIRST_INSTANCE_MARK,
        checksum_first: checksum,
        checksum_second: checksum,
    };

    let mut image = Vec::with_capacity(full_size_for(state.len()) as usize);
    image.extend_from_slice(&header.to_bytes());
    image.extend_from_slice(state);
    image.extend_from_slice(state);
    image
}

/// Positioned field access over a double-buffered file.
#[derive(Debug)]
pub struct LayoutHandler {
    file: Box<dyn StorageFile>,
    state_size: usize,
}

impl LayoutHandler {
    /// Wrap `file`, interpreting it with slots of `state_size` bytes.
    pub fn new(file: Box<dyn StorageFile>, state_size: usize) -> Self {
        LayoutHandler { file, state_size }
    }

    /// Payload size of each slot
    pub fn state_size(&self) -> usize {
        self.state_size
    }

    /// Expected file size: header plus two slots
    pub fn full_size(&self) -> u64 {
        full_size_for(self.state_size)
    }

    /// Actual length of the backing file
    pub fn file_len(&mut self) -> io::Result<u64> {
        self.file.len()
    }

    fn state_offset(&self, slot: Slot) -> u64 {
        HEADER_SIZE as u64 + (slot.index() * self.state_size) as u64
    }

    /// Write the whole header as a single buffer.
    pub fn write_header(
        &mut self,
        version: u32,
        size: u32,
        current_instance: u32,
        checksum_first: u64,
        checksum_second: u64,
    ) -> io::Result<()> {
        let header = Header {
            version,
            state_size: size,
            current_instance,
            checksum_first,
            checksum_second,
        };
        self.file.write_all_at(0, &header.to_bytes())
    }

    /// Write the current-instance marker
    pub fn write_current_instance(&mut self, marker: u32) -> io::Result<()> {
        self.file
            .write_all_at(CURRENT_INSTANCE_OFFSET, &marker.to_le_bytes())
    }

    /// Write the checksum field of `slot`
    pub fn write_checksum(&mut self, checksum: u64, slot: Slot) -> io::Result<()> {
        self.file
            .write_all_at(slot.checksum_offset(), &checksum.to_le_bytes())
    }

    /// Write the payload of `slot`. `bytes` must be exactly `state_size` long.
    pub fn write_state(&mut self, bytes: &[u8], slot: Slot) -> io::Result<()> {
        if bytes.len() != self.state_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "State length {} does not match slot size {}",
                    bytes.len(),
                    self.state_size
                ),
            ));
        }
        let offset = self.state_offset(slot);
        self.file.write_all_at(offset, bytes)
    }

    /// Read the whole header
    pub fn read_header(&mut self) -> io::Result<Header> {
        let mut bytes = [0u8; HEADER_SIZE];
        self.file.read_exact_at(0, &mut bytes)?;
        Ok(Header::from_bytes(&bytes))
    }

    /// Read the layout version
    pub fn read_version(&mut self) -> io::Result<u32> {
        self.read_u32_at(VERSION_OFFSET)
    }

    /// Read the stored state size
    pub fn read_size(&mut self) -> io::Result<u32> {
        self.read_u32_at(SIZE_OFFSET)
    }

    /// Read the raw current-instance marker
    pub fn read_current_instance(&mut self) -> io::Result<u32> {
        self.read_u32_at(CURRENT_INSTANCE_OFFSET)
    }

    /// Read the stored checksum of `slot`
    pub fn read_checksum(&mut self, slot: Slot) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.file.read_exact_at(slot.checksum_offset(), &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read the payload of `slot`
    pub fn read_state(&mut self, slot: Slot) -> io::Result<Vec<u8>> {
        let mut state = vec![0u8; self.state_size];
        let offset = self.state_offset(slot);
        self.file.read_exact_at(offset, &mut state)?;
        Ok(state)
    }

    /// Durability barrier over every write issued so far
    pub fn flush(&mut self) -> io::Result<()> {
        self.file.sync()
    }

    fn read_u32_at(&mut self, offset: u64) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.file.read_exact_at(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}
