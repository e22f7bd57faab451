//! Decoders for the kinstr_prfcnt record streams.
//!
//! Both the enumeration list and the per-sample metadata list are
//! fixed-stride sequences of tagged records. The decoders validate the
//! structure as they go: single-occurrence rules, consistency with the
//! block extents, and sentinel termination.

use super::remap::BlockIndexRemap;
use crate::error::DecodeError;
use crate::hwcnt::{
    BlockExtents, BlockState, BlockType, PrfcntSet, SampleFlags, SampleMetadata,
};
use crate::ioctl::kinstr::{
    BlockRecord, BlockStateBits, ClockRecord, EnumItem, MetadataItem, SampleFlagBits,
    API_VERSION, BLOCK_TYPE_CSG, BLOCK_TYPE_FE, BLOCK_TYPE_FIRMWARE, BLOCK_TYPE_MEMORY,
    BLOCK_TYPE_SHADER_CORE, BLOCK_TYPE_TILER, MAX_CLOCK_DOMAINS, SET_PRIMARY, SET_SECONDARY,
    SET_TERTIARY,
};

pub(crate) fn block_type_from_wire(value: u8) -> Result<BlockType, DecodeError> {
    match value {
        BLOCK_TYPE_FE => Ok(BlockType::Fe),
        BLOCK_TYPE_TILER => Ok(BlockType::Tiler),
        BLOCK_TYPE_MEMORY => Ok(BlockType::Memory),
        BLOCK_TYPE_SHADER_CORE => Ok(BlockType::Core),
        BLOCK_TYPE_FIRMWARE => Ok(BlockType::Firmware),
        BLOCK_TYPE_CSG => Ok(BlockType::Csg),
        _ => Err(DecodeError::BlockTypeOutOfRange),
    }
}

pub(crate) fn block_type_to_wire(value: BlockType) -> u8 {
    match value {
        BlockType::Fe => BLOCK_TYPE_FE,
        BlockType::Tiler => BLOCK_TYPE_TILER,
        BlockType::Memory => BLOCK_TYPE_MEMORY,
        BlockType::Core => BLOCK_TYPE_SHADER_CORE,
        BlockType::Firmware => BLOCK_TYPE_FIRMWARE,
        BlockType::Csg => BLOCK_TYPE_CSG,
    }
}

pub(crate) fn set_from_wire(value: u8) -> Result<PrfcntSet, DecodeError> {
    match value {
        SET_PRIMARY => Ok(PrfcntSet::Primary),
        SET_SECONDARY => Ok(PrfcntSet::Secondary),
        SET_TERTIARY => Ok(PrfcntSet::Tertiary),
        _ => Err(DecodeError::UnknownCounterSet),
    }
}

pub(crate) fn set_to_wire(value: PrfcntSet) -> u8 {
    match value {
        PrfcntSet::Primary => SET_PRIMARY,
        PrfcntSet::Secondary => SET_SECONDARY,
        PrfcntSet::Tertiary => SET_TERTIARY,
    }
}

pub(crate) fn block_state_from_wire(value: u32) -> BlockState {
    let bits = BlockStateBits::from_bits_truncate(value);
    BlockState {
        on: bits.contains(BlockStateBits::ON),
        off: bits.contains(BlockStateBits::OFF),
        available: bits.contains(BlockStateBits::AVAILABLE),
        unavailable: bits.contains(BlockStateBits::UNAVAILABLE),
        normal: bits.contains(BlockStateBits::NORMAL_MODE),
        protected_mode: bits.contains(BlockStateBits::PROTECTED_MODE),
    }
}

pub(crate) fn sample_flags_from_wire(value: u32) -> SampleFlags {
    let bits = SampleFlagBits::from_bits_truncate(value);
    SampleFlags {
        stretched: bits.contains(SampleFlagBits::OVERFLOW),
        error: bits.contains(SampleFlagBits::ERROR),
    }
}

/// Result of decoding the enumeration list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct EnumInfo {
    /// Counter set in force.
    pub set: PrfcntSet,
    /// Values per block.
    pub num_values: u16,
    /// Block instances per type.
    pub num_blocks_of_type: [u8; BlockType::COUNT],
    /// The GPU reports top cycle counts.
    pub has_cycles_top: bool,
    /// The GPU reports shader core cycle counts.
    pub has_cycles_sc: bool,
}

/// Request descriptors that must be advertised for this API version.
const REQUIRED_REQUESTS: usize = 2; // mode and enable

/// Decode the enumeration item list.
///
/// # Safety
///
/// Every pointer yielded by `items` must address one full enumeration item.
pub(crate) unsafe fn parse_enum_info(
    items: impl Iterator<Item = *const u8>,
) -> Result<EnumInfo, DecodeError> {
    use crate::ioctl::kinstr::request_type;

    let mut result = EnumInfo::default();
    let mut parsed_blocks = [false; BlockType::COUNT];
    let mut parsed_requests = [false; REQUIRED_REQUESTS];
    let mut parsed_sample_info = false;
    let mut parsed_sentinel = false;

    for ptr in items {
        if parsed_sentinel {
            return Err(DecodeError::TrailingRecords);
        }

        match EnumItem::from_ptr(ptr)? {
            EnumItem::Block(block) => {
                if block.is_sentinel() {
                    parsed_sentinel = true;
                    continue;
                }

                if !parsed_blocks.iter().any(|&b| b) {
                    result.set = set_from_wire(block.set)?;
                    result.num_values = block.num_values;
                }

                // The set and value count must agree across all blocks.
                if result.set != set_from_wire(block.set)? {
                    return Err(DecodeError::CounterSetMismatch);
                }
                if result.num_values != block.num_values {
                    return Err(DecodeError::ValuesPerBlockMismatch);
                }

                // Block types newer kernels add are skipped, not rejected.
                let Ok(ty) = block_type_from_wire(block.ty) else {
                    continue;
                };

                if parsed_blocks[ty as usize] {
                    return Err(DecodeError::DuplicateRecord("block"));
                }
                if block.num_instances > u8::MAX as u16 {
                    return Err(DecodeError::TooManyInstances);
                }

                parsed_blocks[ty as usize] = true;
                result.num_blocks_of_type[ty as usize] = block.num_instances as u8;
            }
            EnumItem::Request(request) => {
                let slot = match request.request_item_type {
                    request_type::MODE => 0,
                    request_type::ENABLE => 1,
                    // Unknown request kinds are skipped.
                    _ => continue,
                };

                if request.versions_mask & (1 << API_VERSION) == 0 {
                    return Err(DecodeError::UnsupportedRequest);
                }
                if parsed_requests[slot] {
                    return Err(DecodeError::DuplicateRecord("request"));
                }
                parsed_requests[slot] = true;
            }
            EnumItem::SampleInfo(sample_info) => {
                if parsed_sample_info {
                    return Err(DecodeError::DuplicateRecord("sample info"));
                }
                if sample_info.num_clock_domains > MAX_CLOCK_DOMAINS as u32 {
                    return Err(DecodeError::ClockDomainsOutOfRange);
                }

                result.has_cycles_top = sample_info.num_clock_domains >= 1;
                result.has_cycles_sc = sample_info.num_clock_domains >= 2;
                parsed_sample_info = true;
            }
        }
    }

    if !parsed_requests.iter().all(|&r| r) {
        return Err(DecodeError::MissingRecord("request"));
    }
    if !parsed_sample_info {
        return Err(DecodeError::MissingRecord("sample info"));
    }
    if !parsed_sentinel {
        return Err(DecodeError::MissingSentinel);
    }

    Ok(result)
}

/// Decode and validate one sample's metadata item list.
///
/// `sm` is filled as records are parsed, so on failure it may hold a
/// partially decoded result; the workaround layer relies on those partial
/// fields to recognize racing samples.
///
/// # Safety
///
/// `first_item` must address a list of at least `extents.num_blocks() + 3`
/// items of `stride` bytes each.
pub(crate) unsafe fn parse_sample_metadata(
    first_item: *const u8,
    stride: usize,
    extents: &BlockExtents,
    remap: Option<&BlockIndexRemap>,
    sm: &mut SampleMetadata,
) -> Result<(), DecodeError> {
    // One sample record, one clock record, the block records, the sentinel.
    let window = extents.num_blocks() + 3;

    let mut num_blocks_of_type = [0u8; BlockType::COUNT];
    let mut num_blocks = 0usize;
    let mut sample_parsed = false;
    let mut clock_parsed = false;
    let mut sentinel_parsed = false;

    for i in 0..window {
        if sentinel_parsed {
            return Err(DecodeError::TrailingRecords);
        }

        match MetadataItem::from_ptr(first_item.add(i * stride))? {
            MetadataItem::Sample(record) => {
                if sample_parsed {
                    return Err(DecodeError::DuplicateRecord("sample"));
                }
                sm.user_data = record.user_data;
                sm.flags = sample_flags_from_wire(record.flags);
                sm.sample_nr = record.seq;
                sm.timestamp_ns_begin = record.timestamp_start;
                sm.timestamp_ns_end = record.timestamp_stop;
                sample_parsed = true;
            }
            MetadataItem::Clock(record) => {
                if clock_parsed {
                    return Err(DecodeError::DuplicateRecord("clock"));
                }
                parse_clock_record(&record, sm);
                clock_parsed = true;
            }
            MetadataItem::Block(record) => {
                let ty = block_type_from_wire(record.ty)?;

                let mut index = record.block_idx;
                if let Some(remap) = remap {
                    index = remap.remap(ty, record.block_idx)?;
                }

                // Per type, blocks must arrive with densely increasing
                // indices.
                if num_blocks_of_type[ty as usize] != index {
                    return Err(DecodeError::BlockIndexOutOfRange);
                }

                num_blocks_of_type[ty as usize] += 1;
                if num_blocks_of_type[ty as usize] > extents.num_blocks_of_type(ty) {
                    return Err(DecodeError::BlockCountMismatch);
                }

                num_blocks += 1;
            }
            MetadataItem::Sentinel => sentinel_parsed = true,
        }
    }

    if !sample_parsed {
        return Err(DecodeError::MissingRecord("sample"));
    }
    if !clock_parsed {
        return Err(DecodeError::MissingRecord("clock"));
    }
    if num_blocks != extents.num_blocks() {
        return Err(DecodeError::BlockCountMismatch);
    }
    if !sentinel_parsed {
        return Err(DecodeError::MissingSentinel);
    }

    Ok(())
}

/// The first clock domain counts GPU cycles; the second, when present,
/// shader core cycles. With a single domain the shader core count falls
/// back to the GPU count.
fn parse_clock_record(record: &ClockRecord, sm: &mut SampleMetadata) {
    const GPU_CYCLE_IDX: u32 = 0;
    const SC_CYCLE_IDX: u32 = 1;

    if record.num_domains > GPU_CYCLE_IDX {
        sm.gpu_cycle = record.cycles[GPU_CYCLE_IDX as usize];
        sm.sc_cycle = record.cycles[GPU_CYCLE_IDX as usize];
    }
    if record.num_domains > SC_CYCLE_IDX {
        sm.sc_cycle = record.cycles[SC_CYCLE_IDX as usize];
    }
}

/// Find the next block record at or after byte `offset` of the mapping.
///
/// Returns the record and the offset just past it. Records of other kinds
/// are skipped; the sentinel ends the scan. The caller has already
/// validated the list, so no diagnostics are produced here.
///
/// # Safety
///
/// `mapping` must address `mapping_len` readable bytes.
pub(crate) unsafe fn find_block_record(
    mapping: *const u8,
    mapping_len: usize,
    mut offset: u64,
    stride: usize,
) -> Option<(BlockRecord, u64)> {
    loop {
        let at = usize::try_from(offset).ok()?;
        if at.checked_add(stride)? > mapping_len {
            return None;
        }

        match MetadataItem::from_ptr(mapping.add(at)) {
            Ok(MetadataItem::Block(record)) => return Some((record, offset + stride as u64)),
            Ok(MetadataItem::Sentinel) => return None,
            // Items of other or unknown kinds are skipped.
            Ok(_) | Err(_) => offset += stride as u64,
        }
    }
}
