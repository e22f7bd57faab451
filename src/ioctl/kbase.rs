//! kbase device ioctls that create the per-backend counter interfaces.

use crate::ffi::{iow, iowr};

/// `hwcnt_reader_setup` argument: creates a vinstr reader fd.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct HwcntReaderSetup {
    /// Requested number of dump buffers.
    pub buffer_count: u32,
    /// Front-end counter selection bitmask.
    pub fe_bm: u32,
    /// Shader counter selection bitmask.
    pub shader_bm: u32,
    /// Tiler counter selection bitmask.
    pub tiler_bm: u32,
    /// MMU/L2 counter selection bitmask.
    pub mmu_l2_bm: u32,
}

/// `kinstr_prfcnt_enum_info` argument.
///
/// With a null list pointer the kernel fills in item size and count; a
/// second call with an allocated list fetches the items.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct KinstrPrfcntEnumInfo {
    pub info_item_size: u32,
    pub info_item_count: u32,
    pub info_list_ptr: u64,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct KinstrPrfcntSetupIn {
    pub request_item_count: u32,
    pub request_item_size: u32,
    pub requests_ptr: u64,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct KinstrPrfcntSetupOut {
    /// Stride of the per-sample metadata items.
    pub prfcnt_metadata_item_size: u32,
    /// Bytes user space should mmap for sample data.
    pub prfcnt_mmap_size_bytes: u32,
}

/// `kinstr_prfcnt_setup` argument: creates a kinstr_prfcnt fd.
#[derive(Clone, Copy)]
#[repr(C)]
pub union KinstrPrfcntSetup {
    pub input: KinstrPrfcntSetupIn,
    pub out: KinstrPrfcntSetupOut,
}

impl Default for KinstrPrfcntSetup {
    fn default() -> Self {
        KinstrPrfcntSetup {
            input: KinstrPrfcntSetupIn::default(),
        }
    }
}

const IFACE: u64 = 0x80;

/// Device fd ioctl command codes.
pub mod command {
    use super::*;

    pub const HWCNT_READER_SETUP: u64 = iow::<HwcntReaderSetup>(IFACE, 0x8);
    pub const KINSTR_PRFCNT_ENUM_INFO: u64 = iowr::<KinstrPrfcntEnumInfo>(IFACE, 0x38);
    pub const KINSTR_PRFCNT_SETUP: u64 = iowr::<KinstrPrfcntSetup>(IFACE, 0x39);
}
