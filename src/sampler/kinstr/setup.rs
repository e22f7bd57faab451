use arrayvec::ArrayVec;
use log::debug;

use super::parse::{self, EnumInfo};
use crate::config::CounterConfig;
use crate::error::Result;
use crate::ffi::{ioctl_argp, Syscall};
use crate::hwcnt::{BlockExtents, BlockType, Features, SampleValuesType};
use crate::instance::Instance;
use crate::ioctl::kbase::{self, KinstrPrfcntEnumInfo, KinstrPrfcntSetup, KinstrPrfcntSetupIn};
use crate::ioctl::kinstr::RequestItem;
use crate::ioctl::StridedIter;
use crate::sampler::filter_block_extents;
use crate::sampler::memory::{FdGuard, MappedMemory};

/// Everything the kinstr_prfcnt backend needs, gathered from the device.
pub(crate) struct Args<S: Syscall> {
    pub fd: FdGuard<S>,
    pub syscall: S,
    pub period_ns: u64,
    pub features: Features,
    pub extents: BlockExtents,
    pub metadata_item_size: usize,
    pub memory: MappedMemory<S>,
    pub sc_mask: u64,
}

/// Fetch and decode the device's counter enumeration.
///
/// The first call with a null list pointer sizes the item list; the second
/// fetches it.
pub(crate) fn fetch_enum_info<S: Syscall>(syscall: &S, device_fd: i32) -> Result<EnumInfo> {
    let mut arg = KinstrPrfcntEnumInfo::default();
    ioctl_argp(
        syscall,
        device_fd,
        kbase::command::KINSTR_PRFCNT_ENUM_INFO,
        &mut arg,
    )?;

    let stride = arg.info_item_size as usize;
    let count = arg.info_item_count as usize;
    let mut memory = vec![0u8; stride * count];
    arg.info_list_ptr = memory.as_mut_ptr() as u64;

    ioctl_argp(
        syscall,
        device_fd,
        kbase::command::KINSTR_PRFCNT_ENUM_INFO,
        &mut arg,
    )?;

    let info =
        unsafe { parse::parse_enum_info(StridedIter::new(memory.as_ptr(), stride, count))? };
    Ok(info)
}

/// Block extents advertised by the enumeration. kinstr_prfcnt samples carry
/// 64-bit counter values.
pub(crate) fn construct_block_extents(enum_info: &EnumInfo) -> BlockExtents {
    BlockExtents::new(
        enum_info.num_blocks_of_type,
        enum_info.num_values,
        SampleValuesType::U64,
    )
}

// Mode request, one enable request per block type, terminator.
const MAX_REQUEST_ITEMS: usize = BlockType::COUNT + 2;

/// Build the setup request list: capture mode, per-block enables, terminator.
pub(crate) fn build_requests(
    period_ns: u64,
    configs: &[CounterConfig],
) -> ArrayVec<RequestItem, MAX_REQUEST_ITEMS> {
    let mut items = ArrayVec::new();

    items.push(RequestItem::mode(period_ns));
    for config in configs {
        items.push(RequestItem::enable(
            parse::block_type_to_wire(config.ty),
            parse::set_to_wire(config.set),
            config.enable.0,
        ));
    }
    items.push(RequestItem::terminator());

    items
}

fn init_features(instance: &Instance, enum_info: &EnumInfo) -> Features {
    Features {
        has_gpu_cycle: enum_info.has_cycles_top,
        has_power_states: instance.block_state.power,
        has_vm_states: instance.block_state.vm,
        has_protection_states: instance.block_state.protection,
        has_stretched_flag: true,
        overflow_behavior_defined: true,
    }
}

/// Create and configure a kinstr_prfcnt session on the device.
pub(crate) fn setup<S: Syscall>(
    instance: &Instance,
    period_ns: u64,
    configs: &[CounterConfig],
    syscall: &S,
) -> Result<Args<S>> {
    let enum_info = fetch_enum_info(syscall, instance.device_fd)?;

    let advertised = construct_block_extents(&enum_info);
    let extents = filter_block_extents(&advertised, configs)?;

    let mut requests = build_requests(period_ns, configs);

    let mut setup_arg = KinstrPrfcntSetup {
        input: KinstrPrfcntSetupIn {
            request_item_count: requests.len() as u32,
            request_item_size: size_of::<RequestItem>() as u32,
            requests_ptr: requests.as_mut_ptr() as u64,
        },
    };
    let counter_fd = ioctl_argp(
        syscall,
        instance.device_fd,
        kbase::command::KINSTR_PRFCNT_SETUP,
        &mut setup_arg,
    )?;
    let fd = FdGuard::new(counter_fd, syscall.clone());

    let out = unsafe { setup_arg.out };
    debug!(
        "kinstr_prfcnt fd {} with {} byte items, {} byte mapping",
        counter_fd, out.prfcnt_metadata_item_size, out.prfcnt_mmap_size_bytes
    );

    let memory = MappedMemory::map(
        counter_fd,
        out.prfcnt_mmap_size_bytes as usize,
        syscall.clone(),
    )?;

    Ok(Args {
        fd,
        syscall: syscall.clone(),
        period_ns,
        features: init_features(instance, &enum_info),
        extents,
        metadata_item_size: out.prfcnt_metadata_item_size as usize,
        memory,
        sc_mask: instance.constants.shader_core_mask,
    })
}
