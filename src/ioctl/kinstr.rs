//! `kinstr_prfcnt` counter ABI (current kernels).
//!
//! Enumeration, request and metadata items share one framing: a 2-byte type
//! tag, a 2-byte item version, 4 padding bytes, then a type-specific payload.
//! Item tags pack a list kind into the top 4 bits and a subtype into the low
//! 12, so e.g. metadata items start at `0x2000`.

use bitflags::bitflags;

use crate::error::DecodeError;
use crate::ffi::{ior, iow};
use crate::ioctl::read_record;

/// Protocol version spoken by this crate.
pub const API_VERSION: u16 = 0;

/// Counter block type on the wire.
pub const BLOCK_TYPE_FE: u8 = 0;
pub const BLOCK_TYPE_TILER: u8 = 1;
pub const BLOCK_TYPE_MEMORY: u8 = 2;
pub const BLOCK_TYPE_SHADER_CORE: u8 = 3;
pub const BLOCK_TYPE_FIRMWARE: u8 = 4;
pub const BLOCK_TYPE_CSG: u8 = 5;

/// Counter set selector on the wire.
pub const SET_PRIMARY: u8 = 0;
pub const SET_SECONDARY: u8 = 1;
pub const SET_TERTIARY: u8 = 2;

/// Item type tags. `NONE` doubles as the enumeration block tag: the
/// enumeration list is terminated by an all-zero block descriptor instead.
pub mod item_type {
    pub const NONE: u16 = 0;

    pub const ENUM_BLOCK: u16 = 0x0000;
    pub const ENUM_REQUEST: u16 = 0x0001;
    pub const ENUM_SAMPLE_INFO: u16 = 0x0002;

    pub const REQUEST_MODE: u16 = 0x1000;
    pub const REQUEST_ENABLE: u16 = 0x1001;
    pub const REQUEST_SCOPE: u16 = 0x1002;

    pub const METADATA_SAMPLE: u16 = 0x2000;
    pub const METADATA_CLOCK: u16 = 0x2001;
    pub const METADATA_BLOCK: u16 = 0x2002;
}

/// Common item header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ItemHeader {
    pub item_type: u16,
    pub item_version: u16,
}

/// Offset of the payload from the item start (header plus 4 padding bytes).
pub const ITEM_PAYLOAD_OFFSET: usize = 8;

bitflags! {
    /// Block state bits as reported per block record.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BlockStateBits: u32 {
        const ON = 1 << 0;
        const OFF = 1 << 1;
        const AVAILABLE = 1 << 2;
        const UNAVAILABLE = 1 << 3;
        const NORMAL_MODE = 1 << 4;
        const PROTECTED_MODE = 1 << 5;
    }

    /// Sample flag bits as reported in the sample record.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SampleFlagBits: u32 {
        /// Dump duration was stretched because the sample buffer was full.
        const OVERFLOW = 1 << 0;
        /// The sample had an error condition for its whole duration.
        const ERROR = 1 << 30;
    }
}

/// Enumeration payload: counter block descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct EnumBlock {
    pub ty: u8,
    pub set: u8,
    pad: [u8; 2],
    /// Instances of this block type in the hardware.
    pub num_instances: u16,
    /// Entries in the values array for samples from this block.
    pub num_values: u16,
    /// Availability of each counter index in this block.
    pub counter_mask: [u64; 2],
}

impl EnumBlock {
    /// The enumeration sentinel is an all-zero block descriptor.
    pub fn is_sentinel(&self) -> bool {
        self.num_instances == 0 && self.num_values == 0
    }
}

/// Enumeration payload: request descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct EnumRequest {
    /// One of [`request_type`].
    pub request_item_type: u16,
    pad: u16,
    /// Bitmask of API versions supporting this request.
    pub versions_mask: u32,
}

/// Request descriptor subtypes advertised by enumeration.
pub mod request_type {
    pub const MODE: u16 = 0;
    pub const ENABLE: u16 = 1;
    pub const SCOPE: u16 = 2;
}

/// Enumeration payload: sample information.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct EnumSampleInfo {
    pub num_clock_domains: u32,
    pad: u32,
}

/// One decoded enumeration item.
#[derive(Clone, Copy, Debug)]
pub enum EnumItem {
    Block(EnumBlock),
    Request(EnumRequest),
    SampleInfo(EnumSampleInfo),
}

impl EnumItem {
    /// Decode the enumeration item at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point at one full enumeration item.
    pub unsafe fn from_ptr(ptr: *const u8) -> Result<Self, DecodeError> {
        let hdr: ItemHeader = read_record(ptr);
        let payload = ptr.add(ITEM_PAYLOAD_OFFSET);
        match hdr.item_type {
            item_type::ENUM_BLOCK => Ok(EnumItem::Block(read_record(payload))),
            item_type::ENUM_REQUEST => Ok(EnumItem::Request(read_record(payload))),
            item_type::ENUM_SAMPLE_INFO => Ok(EnumItem::SampleInfo(read_record(payload))),
            other => Err(DecodeError::UnknownRecord(other)),
        }
    }
}

/// Metadata payload: sample descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SampleRecord {
    /// Earliest timestamp the sample values represent.
    pub timestamp_start: u64,
    /// Latest timestamp the sample values represent.
    pub timestamp_stop: u64,
    /// Kernel sequence number; matches the `GET_SAMPLE` handle.
    pub seq: u64,
    /// User data provided to the start/sample command.
    pub user_data: u64,
    /// Raw [`SampleFlagBits`].
    pub flags: u32,
    pad: u32,
}

/// Maximum clock domains a clock record can report.
pub const MAX_CLOCK_DOMAINS: usize = 4;

/// Metadata payload: clock cycles descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ClockRecord {
    /// Domains valid in `cycles`.
    pub num_domains: u32,
    pad: u32,
    pub cycles: [u64; MAX_CLOCK_DOMAINS],
}

/// Metadata payload: counter block descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct BlockRecord {
    pub ty: u8,
    pub block_idx: u8,
    pub set: u8,
    pad: u8,
    /// Raw [`BlockStateBits`].
    pub block_state: u32,
    /// Offset of this block's values from the start of the mapping.
    pub values_offset: u32,
    pad2: u32,
}

/// One decoded sample metadata item.
#[derive(Clone, Copy, Debug)]
pub enum MetadataItem {
    Sample(SampleRecord),
    Clock(ClockRecord),
    Block(BlockRecord),
    /// Zero-type sentinel terminating the list.
    Sentinel,
}

impl MetadataItem {
    /// Decode the metadata item at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point at one full metadata item.
    pub unsafe fn from_ptr(ptr: *const u8) -> Result<Self, DecodeError> {
        let hdr: ItemHeader = read_record(ptr);
        let payload = ptr.add(ITEM_PAYLOAD_OFFSET);
        match hdr.item_type {
            item_type::NONE => Ok(MetadataItem::Sentinel),
            item_type::METADATA_SAMPLE => Ok(MetadataItem::Sample(read_record(payload))),
            item_type::METADATA_CLOCK => Ok(MetadataItem::Clock(read_record(payload))),
            item_type::METADATA_BLOCK => Ok(MetadataItem::Block(read_record(payload))),
            other => Err(DecodeError::UnknownRecord(other)),
        }
    }
}

/// Sampling mode selector in a mode request.
pub const SAMPLING_MODE_MANUAL: u8 = 0;
pub const SAMPLING_MODE_PERIODIC: u8 = 1;

/// Request payload: capture mode.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct RequestMode {
    pub mode: u8,
    pad: [u8; 7],
    /// Sample period in nanoseconds; meaningful in periodic mode only.
    pub period_ns: u64,
}

/// Request payload: counters to enable for one block type.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct RequestEnable {
    pub ty: u8,
    pub set: u8,
    pad: [u8; 6],
    pub enable_mask: [u64; 2],
}

#[derive(Clone, Copy)]
#[repr(C)]
pub union RequestUnion {
    pub mode: RequestMode,
    pub enable: RequestEnable,
    pub raw: [u64; 3],
}

impl Default for RequestUnion {
    fn default() -> Self {
        RequestUnion { raw: [0; 3] }
    }
}

/// One request item of the setup call.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct RequestItem {
    pub hdr: ItemHeader,
    pub pad: [u8; 4],
    pub u: RequestUnion,
}

impl RequestItem {
    pub fn mode(period_ns: u64) -> Self {
        let mode = if period_ns == 0 {
            RequestMode {
                mode: SAMPLING_MODE_MANUAL,
                ..Default::default()
            }
        } else {
            RequestMode {
                mode: SAMPLING_MODE_PERIODIC,
                period_ns,
                ..Default::default()
            }
        };
        RequestItem {
            hdr: ItemHeader {
                item_type: item_type::REQUEST_MODE,
                item_version: API_VERSION,
            },
            u: RequestUnion { mode },
            ..Default::default()
        }
    }

    pub fn enable(ty: u8, set: u8, enable_mask: [u64; 2]) -> Self {
        RequestItem {
            hdr: ItemHeader {
                item_type: item_type::REQUEST_ENABLE,
                item_version: API_VERSION,
            },
            u: RequestUnion {
                enable: RequestEnable {
                    ty,
                    set,
                    enable_mask,
                    ..Default::default()
                },
            },
            ..Default::default()
        }
    }

    /// All-zero terminator closing the request list.
    pub fn terminator() -> Self {
        RequestItem::default()
    }
}

/// Control command codes for the session.
pub const CMD_START: u16 = 1;
pub const CMD_STOP: u16 = 2;
pub const CMD_SAMPLE_SYNC: u16 = 3;
pub const CMD_DISCARD: u16 = 5;

/// Control command argument.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ControlCmd {
    pub cmd: u16,
    pub(crate) pad: [u16; 3],
    pub user_data: u64,
}

/// Handle used to fetch and release one sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SampleAccess {
    /// Kernel sequence number of the sample.
    pub sequence: u64,
    /// Offset from the start of the mapping to the first metadata item.
    pub metadata_offset: u64,
}

const IFACE: u64 = 0xbf;

/// Counter fd ioctl command codes.
pub mod command {
    use super::*;

    pub const ISSUE_COMMAND: u64 = iow::<ControlCmd>(IFACE, 0x0);
    pub const GET_SAMPLE: u64 = ior::<SampleAccess>(IFACE, 0x1);
    pub const PUT_SAMPLE: u64 = iow::<SampleAccess>(IFACE, 0x10);
}
