use log::debug;

use super::layout::{SampleLayout, COUNTERS_PER_BLOCK};
use crate::config::{CounterConfig, EnableMap, Tunables};
use crate::error::{Error, Result};
use crate::ffi::{ioctl_argp, Syscall};
use crate::hwcnt::{BlockExtents, BlockType, Features, PrfcntSet, SampleValuesType};
use crate::instance::{GpuConstants, Instance};
use crate::ioctl::kbase::{self, HwcntReaderSetup};
use crate::ioctl::vinstr::{self, ReaderApiVersion, ReaderFeatures};
use crate::sampler::filter_block_extents;
use crate::sampler::memory::{FdGuard, MappedMemory};

/// Everything the vinstr backend needs, gathered from the device.
pub(crate) struct Args<S: Syscall> {
    pub fd: FdGuard<S>,
    pub period_ns: u64,
    pub features: Features,
    pub reader_features: ReaderFeatures,
    pub extents: BlockExtents,
    pub buffer_size: usize,
    pub buffer_count: u32,
    pub layout: SampleLayout,
    pub memory: MappedMemory<S>,
}

/// Block extents a vinstr device advertises.
///
/// vinstr has no enumeration call; the extents follow from the GPU
/// properties alone. Every block carries 64 32-bit counters.
pub(crate) fn construct_block_extents(constants: &GpuConstants) -> BlockExtents {
    let num_memory_blocks = if constants.v4_layout {
        1
    } else {
        constants.num_l2_slices as u8
    };

    BlockExtents::new(
        [
            1,                // fe
            1,                // tiler
            num_memory_blocks,
            constants.shader_core_mask.count_ones() as u8,
            0, // firmware
            0, // csg
        ],
        COUNTERS_PER_BLOCK,
        SampleValuesType::U32,
    )
}

/// Down-convert a 128-bit enable map to the vinstr 32-bit mask, where one
/// bit covers four consecutive counters.
pub(crate) fn convert_enable_map(map: EnableMap) -> u32 {
    let mut result = 0u32;

    for bit in 0..32 {
        let nibble = (map.0[(bit * 4) / 64] >> ((bit * 4) % 64)) & 0b1111;
        if nibble != 0 {
            result |= 1 << bit;
        }
    }

    result
}

/// Build the reader setup bitmasks from the counter configuration.
pub(crate) fn convert_configs(configs: &[CounterConfig]) -> Result<HwcntReaderSetup> {
    let mut result = HwcntReaderSetup::default();

    for config in configs {
        if config.set != PrfcntSet::Primary {
            return Err(Error::Config("vinstr supports the primary set only"));
        }

        let mask = convert_enable_map(config.enable);
        match config.ty {
            BlockType::Fe => result.fe_bm |= mask,
            BlockType::Tiler => result.tiler_bm |= mask,
            BlockType::Memory => result.mmu_l2_bm |= mask,
            BlockType::Core => result.shader_bm |= mask,
            BlockType::Firmware | BlockType::Csg => {
                return Err(Error::Config("block type not present on vinstr devices"))
            }
        }
    }

    Ok(result)
}

fn init_features(reader_features: ReaderFeatures) -> Features {
    Features {
        has_gpu_cycle: !reader_features.is_empty(),
        has_power_states: false,
        has_vm_states: false,
        has_protection_states: false,
        has_stretched_flag: false,
        overflow_behavior_defined: true,
    }
}

/// Create and configure a vinstr reader on the device.
pub(crate) fn setup<S: Syscall>(
    instance: &Instance,
    period_ns: u64,
    configs: &[CounterConfig],
    tunables: &Tunables,
    syscall: &S,
) -> Result<Args<S>> {
    let advertised = construct_block_extents(&instance.constants);
    let extents = filter_block_extents(&advertised, configs)?;

    let mut setup_args = convert_configs(configs)?;
    setup_args.buffer_count = tunables.max_ring_buffers;

    // Ask for the configured buffer count, halving while the kernel cannot
    // afford the allocation.
    let vinstr_fd = loop {
        match ioctl_argp(
            syscall,
            instance.device_fd,
            kbase::command::HWCNT_READER_SETUP,
            &mut setup_args,
        ) {
            Ok(fd) => break fd,
            Err(e) if e.raw_os_error() == Some(libc::ENOMEM) && setup_args.buffer_count > 2 => {
                setup_args.buffer_count >>= 1;
            }
            Err(e) => return Err(e.into()),
        }
    };
    let fd = FdGuard::new(vinstr_fd, syscall.clone());
    debug!(
        "vinstr reader fd {} with {} buffers",
        vinstr_fd, setup_args.buffer_count
    );

    let mut api_version = ReaderApiVersion::default();
    let queried = ioctl_argp(
        syscall,
        vinstr_fd,
        vinstr::command::GET_API_VERSION_WITH_FEATURES,
        &mut api_version,
    );
    if queried.is_err() {
        // Older readers only know the plain version query and report no
        // cycle counter features.
        api_version = ReaderApiVersion::default();
        ioctl_argp(
            syscall,
            vinstr_fd,
            vinstr::command::GET_API_VERSION,
            &mut api_version.version,
        )?;
    }
    let reader_features = ReaderFeatures::from_bits_truncate(api_version.features);

    let mut buffer_size: u32 = 0;
    ioctl_argp(
        syscall,
        vinstr_fd,
        vinstr::command::GET_BUFFER_SIZE,
        &mut buffer_size,
    )?;

    let mapping_size = buffer_size as usize * setup_args.buffer_count as usize;
    let memory = MappedMemory::map(vinstr_fd, mapping_size, syscall.clone())?;

    let constants = &instance.constants;
    let layout = if constants.v4_layout {
        SampleLayout::v4(&extents, constants.shader_core_mask)
    } else {
        SampleLayout::post_v4(&extents, constants.num_l2_slices, constants.shader_core_mask)
    };

    Ok(Args {
        fd,
        period_ns,
        features: init_features(reader_features),
        reader_features,
        extents,
        buffer_size: buffer_size as usize,
        buffer_count: setup_args.buffer_count,
        layout,
        memory,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enable_map_four_to_one() {
        let mut map = EnableMap::NONE;
        map.set(0); // covers mask bit 0
        map.set(7); // covers mask bit 1
        map.set(64); // covers mask bit 16
        map.set(127); // covers mask bit 31
        assert_eq!(
            convert_enable_map(map),
            1 | (1 << 1) | (1 << 16) | (1 << 31)
        );

        assert_eq!(convert_enable_map(EnableMap::ALL), u32::MAX);
        assert_eq!(convert_enable_map(EnableMap::NONE), 0);
    }

    #[test]
    fn configs_to_bitmasks() {
        let configs = [
            CounterConfig {
                ty: BlockType::Fe,
                set: PrfcntSet::Primary,
                enable: EnableMap::ALL,
            },
            CounterConfig {
                ty: BlockType::Core,
                set: PrfcntSet::Primary,
                enable: [0usize].into_iter().collect(),
            },
        ];
        let setup = convert_configs(&configs).unwrap();
        assert_eq!(setup.fe_bm, u32::MAX);
        assert_eq!(setup.shader_bm, 1);
        assert_eq!(setup.tiler_bm, 0);
    }

    #[test]
    fn secondary_set_rejected() {
        let config = CounterConfig {
            ty: BlockType::Fe,
            set: PrfcntSet::Secondary,
            enable: EnableMap::ALL,
        };
        assert!(matches!(
            convert_configs(&[config]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn extents_from_constants() {
        let constants = GpuConstants {
            shader_core_mask: 0b1011,
            num_l2_slices: 2,
            v4_layout: false,
        };
        let extents = construct_block_extents(&constants);
        assert_eq!(extents.num_blocks_of_type(BlockType::Fe), 1);
        assert_eq!(extents.num_blocks_of_type(BlockType::Memory), 2);
        assert_eq!(extents.num_blocks_of_type(BlockType::Core), 3);
        assert_eq!(extents.values_type(), SampleValuesType::U32);
    }
}
