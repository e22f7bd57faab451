//! Test doubles shared by the backend tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::timestamp::Clock;
use crate::error::{Error, Result};
use crate::hwcnt::{
    BlockExtents, BlockHandle, BlockMetadata, Features, Reader, SampleHandle, SampleMetadata,
};

/// Deterministic clock.
///
/// Timestamp reads jump by 10 so that kernel-side events stamped between
/// two reads (via [`MockClock::stamp`], which advances by 1) land strictly
/// inside the bracketing window.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn stamp(&self) -> u64 {
        let v = self.0.get() + 1;
        self.0.set(v);
        v
    }
}

impl Clock for MockClock {
    fn monotonic_ns(&self) -> u64 {
        let v = self.0.get() + 10;
        self.0.set(v);
        v
    }
}

/// Scripted reader for facade-level tests.
pub(crate) struct FakeReader {
    pub samples: VecDeque<SampleMetadata>,
    pub features: Features,
    pub extents: BlockExtents,
    pub in_flight: bool,
    pub gets: usize,
    pub puts: usize,
}

impl FakeReader {
    pub fn new(samples: impl IntoIterator<Item = SampleMetadata>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            features: Features::default(),
            extents: BlockExtents::default(),
            in_flight: false,
            gets: 0,
            puts: 0,
        }
    }
}

impl Reader for FakeReader {
    fn fd(&self) -> std::os::fd::RawFd {
        -1
    }

    fn features(&self) -> &Features {
        &self.features
    }

    fn block_extents(&self) -> &BlockExtents {
        &self.extents
    }

    fn start(&mut self, _user_data: u64) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self, _user_data: u64) -> Result<()> {
        Ok(())
    }

    fn request_sample(&mut self, _user_data: u64) -> Result<()> {
        Ok(())
    }

    fn get_sample(&mut self, sm: &mut SampleMetadata) -> Result<SampleHandle> {
        if self.in_flight {
            return Err(Error::SampleInFlight);
        }
        let Some(next) = self.samples.pop_front() else {
            return Err(Error::Timeout);
        };
        *sm = next;
        self.gets += 1;
        self.in_flight = true;
        Ok(SampleHandle::default())
    }

    fn next<'s>(
        &'s self,
        _sample: SampleHandle,
        _cursor: &mut BlockHandle,
    ) -> Option<BlockMetadata<'s>> {
        None
    }

    fn put_sample(&mut self, _sample: SampleHandle) -> Result<()> {
        self.in_flight = false;
        self.puts += 1;
        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        Ok(())
    }
}
