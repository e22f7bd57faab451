use std::os::fd::RawFd;

use super::{BlockExtents, BlockMetadata, Features, SampleMetadata};
use crate::error::Result;
use crate::ioctl::{kinstr, vinstr};

/// Opaque cursor for one acquired ring-buffer slot.
///
/// A plain value: it carries no ownership of the ring buffer, which belongs
/// to the backend for its whole lifetime. Internally a tagged union over the
/// backend-specific representations, so a handle can never be reinterpreted
/// as the wrong variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleHandle(pub(crate) SampleSlot);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum SampleSlot {
    #[default]
    None,
    Vinstr(vinstr::ReaderMetadata),
    Kinstr(kinstr::SampleAccess),
    /// Sample synthesized by the workaround layer; nothing to return to the
    /// kernel.
    Synthetic,
}

impl SampleHandle {
    pub(crate) fn vinstr(metadata: vinstr::ReaderMetadata) -> Self {
        SampleHandle(SampleSlot::Vinstr(metadata))
    }

    pub(crate) fn kinstr(access: kinstr::SampleAccess) -> Self {
        SampleHandle(SampleSlot::Kinstr(access))
    }

    pub(crate) fn synthetic() -> Self {
        SampleHandle(SampleSlot::Synthetic)
    }

    pub(crate) fn is_synthetic(&self) -> bool {
        matches!(self.0, SampleSlot::Synthetic)
    }
}

/// Opaque cursor for a position within one sample's block list.
///
/// The default value starts an iteration; [`Reader::next`] advances it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockHandle(pub(crate) BlockCursor);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum BlockCursor {
    /// Iteration not started yet.
    #[default]
    Start,
    /// Next entry of the vinstr layout table.
    Vinstr(usize),
    /// Byte offset of the next metadata item to examine.
    Kinstr(u64),
    Done,
}

/// Hardware counter reader protocol.
///
/// Counters are collected in the kernel and delivered through a ring buffer
/// of constant, unspecified size. [`Reader::get_sample`] waits for a sample
/// and acquires its ring-buffer entry so the kernel leaves the memory alone;
/// at most one sample can be checked out at a time, and a second acquisition
/// fails with [`Error::SampleInFlight`][crate::Error::SampleInFlight].
/// Blocks of the acquired sample are walked with [`Reader::next`], and
/// [`Reader::put_sample`] hands the entry back. If the ring buffer is not
/// emptied fast enough it overflows and the kernel keeps accumulating into
/// the last slot, stretching that sample's period.
///
/// All mutating operations take `&mut self`: exclusive access replaces the
/// serializing lock of the underlying C driver library. Wrap the sampler in
/// a `Mutex` to share it between threads.
///
/// It is a low-level interface; [`Sample`][super::Sample] is the convenient
/// way to consume it.
pub trait Reader {
    /// File descriptor of the counter interface.
    ///
    /// Can be polled (`POLLIN`) to learn when a sample is ready without
    /// committing to the blocking [`Reader::get_sample`].
    fn fd(&self) -> RawFd;

    /// Features supported by this backend instance.
    fn features(&self) -> &Features;

    /// Extents of the blocks this reader was configured with.
    fn block_extents(&self) -> &BlockExtents;

    /// Start counter accumulation. No-op while already active.
    fn start(&mut self, user_data: u64) -> Result<()>;

    /// Stop accumulation and flush the final interval into the ring buffer
    /// as one sample tagged with `user_data`. No-op while already inactive.
    fn stop(&mut self, user_data: u64) -> Result<()>;

    /// Request an accumulated-interval sample without stopping.
    ///
    /// Manual mode only; fails with
    /// [`Error::InvalidMode`][crate::Error::InvalidMode] on a periodic
    /// backend.
    fn request_sample(&mut self, user_data: u64) -> Result<()>;

    /// Wait for a sample, acquire its ring-buffer entry and decode its
    /// metadata into `sm`.
    ///
    /// Blocks with an unbounded poll. On a decode failure the entry is
    /// released back to the kernel before the error returns, so the slot
    /// cannot leak; `sm` may then hold partially decoded fields and must not
    /// be used as a sample.
    fn get_sample(&mut self, sm: &mut SampleMetadata) -> Result<SampleHandle>;

    /// Advance a block iteration over the acquired sample.
    ///
    /// A default `cursor` starts the iteration; `None` means it is
    /// exhausted. Two independent iterations over one sample may run at the
    /// same time. The iteration order is unspecified: types and indices may
    /// appear out of order.
    fn next<'s>(&'s self, sample: SampleHandle, cursor: &mut BlockHandle)
        -> Option<BlockMetadata<'s>>;

    /// Release the sample's ring-buffer entry back to the kernel.
    ///
    /// All block values obtained from the sample are invalid afterwards (the
    /// borrow on `self` enforces this).
    fn put_sample(&mut self, sample: SampleHandle) -> Result<()>;

    /// Drain buffered samples.
    ///
    /// Races against a concurrently collecting periodic session; stop
    /// periodic sampling first.
    fn discard(&mut self) -> Result<()>;
}
