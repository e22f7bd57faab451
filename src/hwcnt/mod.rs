//! Public hardware counter data model.
//!
//! Counters are collected per hardware block. A sample is one ring-buffer
//! entry: its [`SampleMetadata`] plus one [`BlockMetadata`] record per block
//! captured over the accumulation interval.

pub(crate) mod reader;
pub mod sample;

pub use reader::{BlockHandle, Reader, SampleHandle};
pub use sample::Sample;

/// Hardware counter block type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlockType {
    /// Front end.
    Fe,
    /// Tiler.
    Tiler,
    /// Memory system (L2 slice).
    Memory,
    /// Shader core.
    Core,
    /// CSF firmware.
    Firmware,
    /// Firmware command stream group.
    Csg,
}

impl BlockType {
    /// Number of block types.
    pub const COUNT: usize = 6;

    /// All block types, in wire order.
    pub const ALL: [BlockType; Self::COUNT] = [
        BlockType::Fe,
        BlockType::Tiler,
        BlockType::Memory,
        BlockType::Core,
        BlockType::Firmware,
        BlockType::Csg,
    ];

}

/// Counter set number a block stores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrfcntSet {
    #[default]
    Primary,
    Secondary,
    Tertiary,
}

/// Width of the counter values in a sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleValuesType {
    /// Values are 32-bit unsigned integers.
    #[default]
    U32,
    /// Values are 64-bit unsigned integers.
    U64,
}

impl SampleValuesType {
    /// Size of one counter value in bytes.
    pub fn size(self) -> usize {
        match self {
            SampleValuesType::U32 => 4,
            SampleValuesType::U64 => 8,
        }
    }
}

/// Block numbers and counter widths of a sampling configuration.
///
/// Derived once from device enumeration; every decoded sample is validated
/// against it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockExtents {
    num_blocks_of_type: [u8; BlockType::COUNT],
    counters_per_block: u16,
    values_type: SampleValuesType,
}

impl BlockExtents {
    pub fn new(
        num_blocks_of_type: [u8; BlockType::COUNT],
        counters_per_block: u16,
        values_type: SampleValuesType,
    ) -> Self {
        Self {
            num_blocks_of_type,
            counters_per_block,
            values_type,
        }
    }

    /// Total number of counter blocks in a sample.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks_of_type.iter().map(|&n| n as usize).sum()
    }

    /// Number of blocks of the given type.
    pub fn num_blocks_of_type(&self, ty: BlockType) -> u8 {
        self.num_blocks_of_type[ty as usize]
    }

    /// Number of counters per block.
    pub fn counters_per_block(&self) -> u16 {
        self.counters_per_block
    }

    /// Width of the counter values.
    pub fn values_type(&self) -> SampleValuesType {
        self.values_type
    }

    /// Size of one block's values array in bytes.
    pub fn block_values_size(&self) -> usize {
        self.counters_per_block as usize * self.values_type.size()
    }
}

/// Features supported by a backend instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Features {
    /// Sample metadata carries GPU (and possibly shader core) cycles.
    pub has_gpu_cycle: bool,
    /// Block state reports power transitions.
    pub has_power_states: bool,
    /// Block state reports VM availability.
    pub has_vm_states: bool,
    /// Block state reports protected-mode operation.
    pub has_protection_states: bool,
    /// The `stretched` sample flag is meaningful.
    pub has_stretched_flag: bool,
    /// Counter behavior on ring-buffer overflow is defined.
    pub overflow_behavior_defined: bool,
}

/// Block state during the counter sample time.
///
/// If no bits are set the state is unknown; see the corresponding
/// [`Features`] flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockState {
    /// Powered on for at least part of the sample.
    pub on: bool,
    /// Powered off for at least part of the sample.
    pub off: bool,
    /// Available to this VM for at least part of the sample.
    pub available: bool,
    /// Unavailable to this VM for at least part of the sample. No data is
    /// collected while unavailable.
    pub unavailable: bool,
    /// Operating in normal (non-protected) mode for at least part of the
    /// sample.
    pub normal: bool,
    /// Operating in protected mode for at least part of the sample. No data
    /// is collected in protected mode.
    pub protected_mode: bool,
}

/// Sample flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleFlags {
    /// The sample period was stretched because the ring buffer was full.
    /// Undefined if [`Features::has_stretched_flag`] is false.
    pub stretched: bool,
    /// The sample had an error condition for its duration.
    pub error: bool,
}

/// Hardware counter sample metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleMetadata {
    /// User data from the corresponding start/stop/sample request.
    pub user_data: u64,
    /// Sample flags.
    pub flags: SampleFlags,
    /// Monotonically increasing sample number.
    pub sample_nr: u64,
    /// Earliest timestamp the values represent (nanoseconds).
    pub timestamp_ns_begin: u64,
    /// Latest timestamp the values represent (nanoseconds).
    pub timestamp_ns_end: u64,
    /// GPU cycles since the previous sample. Undefined if
    /// [`Features::has_gpu_cycle`] is false.
    pub gpu_cycle: u64,
    /// Shader core cycles since the previous sample. Undefined if
    /// [`Features::has_gpu_cycle`] is false.
    pub sc_cycle: u64,
}

/// One hardware counter block of an acquired sample.
///
/// `values` borrows the shared user-kernel mapping and is only valid while
/// the sample is checked out; the borrow is tied to the reader, so releasing
/// the sample invalidates it at compile time.
#[derive(Clone, Copy, Debug)]
pub struct BlockMetadata<'a> {
    /// Block type.
    pub ty: BlockType,
    /// Instance index within the blocks of this type.
    pub index: u8,
    /// Counter set this block stores.
    pub set: PrfcntSet,
    /// Block state during the sampling time.
    pub state: BlockState,
    /// Raw counter values; [`BlockExtents::counters_per_block`] values of
    /// [`BlockExtents::values_type`] width, little endian.
    pub values: &'a [u8],
}

impl BlockMetadata<'_> {
    /// Read counter `index`, widening 32-bit values to 64 bits.
    pub fn value(&self, index: usize, ty: SampleValuesType) -> u64 {
        match ty {
            SampleValuesType::U32 => {
                let at = index * 4;
                u32::from_le_bytes(self.values[at..at + 4].try_into().unwrap()) as u64
            }
            SampleValuesType::U64 => {
                let at = index * 8;
                u64::from_le_bytes(self.values[at..at + 8].try_into().unwrap())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extents_totals() {
        let extents = BlockExtents::new([1, 1, 2, 4, 0, 0], 64, SampleValuesType::U32);
        assert_eq!(extents.num_blocks(), 8);
        assert_eq!(extents.num_blocks_of_type(BlockType::Core), 4);
        assert_eq!(extents.num_blocks_of_type(BlockType::Csg), 0);
        assert_eq!(extents.block_values_size(), 256);
    }

    #[test]
    fn block_value_widths() {
        let bytes: Vec<u8> = (0u8..16).collect();
        let bm = BlockMetadata {
            ty: BlockType::Fe,
            index: 0,
            set: PrfcntSet::Primary,
            state: BlockState::default(),
            values: &bytes,
        };
        assert_eq!(bm.value(1, SampleValuesType::U32), 0x07060504);
        assert_eq!(bm.value(1, SampleValuesType::U64), 0x0f0e0d0c0b0a0908);
    }
}
