//! `vinstr` counter reader ABI (legacy job-manager kernels).

use bitflags::bitflags;

use crate::ffi::{ior, iow};

/// Events that trigger a sample dump.
pub const EVENT_MANUAL: u32 = 0;
pub const EVENT_PERIODIC: u32 = 1;

bitflags! {
    /// Features advertised by the vinstr reader.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ReaderFeatures: u32 {
        /// Samples are annotated with the top cycle counter.
        const CYCLES_TOP = 1 << 0;
        /// Samples are annotated with the shader cores cycle counter.
        const CYCLES_SHADER_CORE = 1 << 1;
    }
}

/// Sample buffer metadata, filled by `GET_BUFFER`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ReaderMetadata {
    /// Time when the sample was collected.
    pub timestamp: u64,
    /// Event that triggered the dump ([`EVENT_MANUAL`], [`EVENT_PERIODIC`]).
    pub event_id: u32,
    /// Ring-buffer slot index holding the sample.
    pub buffer_idx: u32,
}

/// GPU cycle counts accompanying a sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ReaderMetadataCycles {
    /// Cycles on the main GPU clock.
    pub top: u64,
    /// Cycles elapsed on the shader cores.
    pub shader_cores: u64,
}

/// Sample buffer metadata annotated with cycle counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ReaderMetadataWithCycles {
    pub metadata: ReaderMetadata,
    pub cycles: ReaderMetadataCycles,
}

/// Reader API version with its feature mask.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ReaderApiVersion {
    pub version: u32,
    /// Raw [`ReaderFeatures`] bits.
    pub features: u32,
}

const IFACE: u64 = 0xbe;

/// Reader ioctl command codes.
pub mod command {
    use super::*;

    pub const GET_BUFFER_SIZE: u64 = ior::<u32>(IFACE, 0x1);
    pub const DUMP: u64 = iow::<u32>(IFACE, 0x10);
    pub const CLEAR: u64 = iow::<u32>(IFACE, 0x11);
    pub const GET_BUFFER: u64 = ior::<ReaderMetadata>(IFACE, 0x20);
    pub const GET_BUFFER_WITH_CYCLES: u64 = ior::<ReaderMetadataWithCycles>(IFACE, 0x20);
    pub const PUT_BUFFER: u64 = iow::<ReaderMetadata>(IFACE, 0x21);
    pub const SET_INTERVAL: u64 = iow::<u32>(IFACE, 0x30);
    pub const GET_API_VERSION: u64 = iow::<u32>(IFACE, 0xff);
    pub const GET_API_VERSION_WITH_FEATURES: u64 = iow::<ReaderApiVersion>(IFACE, 0xff);
}
