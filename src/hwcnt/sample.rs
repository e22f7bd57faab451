use log::warn;

use super::reader::Reader;
use super::{BlockHandle, BlockMetadata, SampleHandle, SampleMetadata};
use crate::error::Result;

/// Scoped hardware counter sample.
///
/// Construction acquires a sample with [`Reader::get_sample`]; dropping the
/// value releases it with [`Reader::put_sample`]. A failed acquisition never
/// constructs a `Sample`, so neither its metadata nor its blocks can be
/// touched after a failure, and the exclusive borrow on the reader makes
/// use-after-release unrepresentable.
///
/// ```no_run
/// # use kbase_hwcnt::hwcnt::{Reader, Sample};
/// # fn demo(reader: &mut dyn Reader) -> kbase_hwcnt::Result<()> {
/// let sample = Sample::new(reader)?;
/// println!("user data: {}", sample.metadata().user_data);
/// for block in sample.blocks() {
///     println!("{:?}[{}]", block.ty, block.index);
/// }
/// sample.release()?; // or just drop it
/// # Ok(())
/// # }
/// ```
pub struct Sample<'r> {
    reader: &'r mut dyn Reader,
    metadata: SampleMetadata,
    handle: SampleHandle,
}

impl<'r> Sample<'r> {
    /// Wait for the next sample and acquire it.
    pub fn new(reader: &'r mut dyn Reader) -> Result<Self> {
        let mut metadata = SampleMetadata::default();
        let handle = reader.get_sample(&mut metadata)?;
        Ok(Self {
            reader,
            metadata,
            handle,
        })
    }

    /// Decoded sample metadata.
    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    /// Iterator over the sample's counter blocks.
    ///
    /// Lazy and finite; the iteration order is unspecified.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            reader: &*self.reader,
            handle: self.handle,
            cursor: BlockHandle::default(),
        }
    }

    /// Release the sample, reporting a failed `put_sample`.
    ///
    /// Dropping the sample releases it too, but swallows the error.
    pub fn release(self) -> Result<()> {
        let mut this = std::mem::ManuallyDrop::new(self);
        let handle = this.handle;
        this.reader.put_sample(handle)
    }
}

impl Drop for Sample<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.reader.put_sample(self.handle) {
            warn!("failed to release counter sample: {e}");
        }
    }
}

/// Iterator over the blocks of one acquired [`Sample`].
pub struct Blocks<'s> {
    reader: &'s dyn Reader,
    handle: SampleHandle,
    cursor: BlockHandle,
}

impl<'s> Iterator for Blocks<'s> {
    type Item = BlockMetadata<'s>;

    fn next(&mut self) -> Option<BlockMetadata<'s>> {
        self.reader.next(self.handle, &mut self.cursor)
    }
}
