//! Device-probe boundary.
//!
//! Opening the device node, checking the driver version and reading GPU
//! properties belong to the caller's probe layer. The sampler consumes the
//! probe's results through [`Instance`]; nothing here touches the device.

use std::os::fd::RawFd;

/// Counter interface generation the kernel exposes.
///
/// Fixed by the driver version, decided once at probe time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterIface {
    /// Legacy `vinstr` reader (job-manager kernels).
    Vinstr,
    /// Current `kinstr_prfcnt` interface.
    KinstrPrfcnt,
}

/// GPU constants the sampler layout logic depends on.
#[derive(Clone, Copy, Debug)]
pub struct GpuConstants {
    /// Physical shader core mask; bit `n` set means core slot `n` is
    /// present. Sparse masks are common on real parts.
    pub shader_core_mask: u64,
    /// Number of L2 cache slices.
    pub num_l2_slices: u32,
    /// The GPU uses the early (v4) counter block layout.
    pub v4_layout: bool,
}

/// Block-state reporting capabilities of the probed driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockStateSupport {
    pub power: bool,
    pub vm: bool,
    pub protection: bool,
}

/// A probed GPU device, ready for sampler construction.
#[derive(Clone, Copy, Debug)]
pub struct Instance {
    /// Open kbase device descriptor. The sampler issues setup ioctls on it
    /// but does not take ownership; the per-backend counter descriptor those
    /// ioctls create is owned by the backend.
    pub device_fd: RawFd,
    /// Counter interface generation to use.
    pub iface: CounterIface,
    /// GPU constants from the properties probe.
    pub constants: GpuConstants,
    /// Block-state reporting support of this driver version.
    pub block_state: BlockStateSupport,
}
