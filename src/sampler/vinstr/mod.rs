//! Backend for the legacy `vinstr` counter reader.
//!
//! vinstr samples are bare counter dumps: the buffer holds nothing but the
//! counter values, laid out per the static [`SampleLayout`] table, and the
//! dump metadata arrives through the `GET_BUFFER` ioctl rather than records
//! in the mapping. User data is not round-tripped through the kernel either;
//! manual dump tags are queued locally (dumps complete in order) and
//! periodic samples take the user data of their session.

use std::os::fd::RawFd;

use layout::SampleLayout;
use session::Session;

use crate::error::{Error, Result};
use crate::ffi::{ioctl_argp, Syscall};
use crate::hwcnt::reader::{BlockCursor, SampleSlot};
use crate::hwcnt::{
    BlockExtents, BlockHandle, BlockMetadata, BlockState, Features, PrfcntSet, Reader,
    SampleFlags, SampleHandle, SampleMetadata,
};
use crate::ioctl::vinstr::{
    command, ReaderFeatures, ReaderMetadataWithCycles, EVENT_MANUAL,
};
use crate::sampler::discard::discard_impl;
use crate::sampler::memory::{FdGuard, MappedMemory};
use crate::sampler::poll::wait_for_sample;
use crate::sampler::queue::BoundedQueue;
use crate::sampler::timestamp::Clock;

pub(crate) mod layout;
mod session;
pub(crate) mod setup;

pub(crate) struct Backend<S: Syscall, C: Clock> {
    fd: FdGuard<S>,
    syscall: S,
    clock: C,
    features: Features,
    reader_features: ReaderFeatures,
    extents: BlockExtents,
    buffer_size: usize,
    period_ns: u64,
    memory: MappedMemory<S>,
    layout: SampleLayout,
    active: bool,
    /// Periodic collection timer is running.
    sampling: bool,
    in_flight: bool,
    /// User data of manual dumps not yet consumed. Dumps complete in
    /// submission order, so a FIFO pairs them back up.
    user_data_manual: BoundedQueue<u64>,
    sessions: BoundedQueue<Session>,
    sample_nr_alloc: u64,
}

impl<S: Syscall, C: Clock> Backend<S, C> {
    pub fn new(args: setup::Args<S>, syscall: S, clock: C) -> Self {
        // One stop dump per buffered session plus one running session.
        let max_sessions = args.buffer_count as usize * 2;

        Self {
            fd: args.fd,
            syscall,
            clock,
            features: args.features,
            reader_features: args.reader_features,
            extents: args.extents,
            buffer_size: args.buffer_size,
            period_ns: args.period_ns,
            memory: args.memory,
            layout: args.layout,
            active: false,
            sampling: false,
            in_flight: false,
            user_data_manual: BoundedQueue::new(max_sessions),
            sessions: BoundedQueue::new(max_sessions),
            sample_nr_alloc: 0,
        }
    }

    fn is_periodic(&self) -> bool {
        self.period_ns != 0
    }

    /// Trigger a manual dump and queue its user data.
    ///
    /// Used both for explicit sample requests and for the implicit dump a
    /// session stop performs.
    fn request_dump(&mut self, user_data: u64) -> Result<()> {
        if !self.active {
            return Err(Error::InvalidMode);
        }

        self.syscall.ioctl_val(self.fd.fd(), command::DUMP, 0)?;
        self.user_data_manual.push(user_data);

        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.syscall.ioctl_val(self.fd.fd(), command::CLEAR, 0)?;
        Ok(())
    }

    fn set_interval(&mut self, period_ns: u64) -> Result<()> {
        self.syscall
            .ioctl_val(self.fd.fd(), command::SET_INTERVAL, period_ns)?;
        Ok(())
    }
}

impl<S: Syscall, C: Clock> Reader for Backend<S, C> {
    fn fd(&self) -> RawFd {
        self.fd.fd()
    }

    fn features(&self) -> &Features {
        &self.features
    }

    fn block_extents(&self) -> &BlockExtents {
        &self.extents
    }

    fn start(&mut self, user_data: u64) -> Result<()> {
        if self.active {
            return Ok(());
        }
        if self.sessions.is_full() {
            return Err(Error::NotPermitted);
        }

        self.clear()?;

        let now = self.clock.monotonic_ns();

        if self.is_periodic() {
            self.set_interval(self.period_ns)?;
            self.sampling = true;
        }

        self.sessions.push(Session::new(now, user_data));
        self.active = true;

        Ok(())
    }

    fn stop(&mut self, user_data: u64) -> Result<()> {
        if !self.active {
            return Ok(());
        }

        if self.is_periodic() && self.sampling {
            self.set_interval(0)?;
            self.sampling = false;
        }

        self.request_dump(user_data)?;

        let stop_sample_nr = self.user_data_manual.push_count();
        if let Some(session) = self.sessions.back_mut() {
            session.stop(stop_sample_nr);
        }

        self.active = false;
        Ok(())
    }

    fn request_sample(&mut self, user_data: u64) -> Result<()> {
        if self.is_periodic() {
            return Err(Error::InvalidMode);
        }
        self.request_dump(user_data)
    }

    fn get_sample(&mut self, sm: &mut SampleMetadata) -> Result<SampleHandle> {
        if self.in_flight {
            return Err(Error::SampleInFlight);
        }

        wait_for_sample(&self.syscall, self.fd.fd())?;

        let mut metadata = ReaderMetadataWithCycles::default();
        if !self.reader_features.is_empty() {
            ioctl_argp(
                &self.syscall,
                self.fd.fd(),
                command::GET_BUFFER_WITH_CYCLES,
                &mut metadata,
            )?;
        } else {
            ioctl_argp(
                &self.syscall,
                self.fd.fd(),
                command::GET_BUFFER,
                &mut metadata.metadata,
            )?;
        }

        let is_manual = metadata.metadata.event_id == EVENT_MANUAL;
        let ts = metadata.metadata.timestamp;
        let manual_user_data = if is_manual {
            self.user_data_manual.pop()
        } else {
            None
        };
        let manual_sample_nr = self.user_data_manual.pop_count();

        let mut erase_session = false;
        match self.sessions.front_mut() {
            Some(session) => {
                sm.user_data = if is_manual {
                    manual_user_data.unwrap_or(0)
                } else {
                    session.user_data_periodic()
                };
                sm.timestamp_ns_begin = session.update_ts(ts);
                erase_session = is_manual && session.can_erase(manual_sample_nr);
            }
            None => {
                // A dump raced past its session bookkeeping; nothing to
                // substitute.
                sm.user_data = manual_user_data.unwrap_or(0);
                sm.timestamp_ns_begin = ts;
            }
        }
        if erase_session {
            self.sessions.pop();
        }

        sm.flags = SampleFlags::default();
        sm.sample_nr = self.sample_nr_alloc;
        self.sample_nr_alloc += 1;
        sm.timestamp_ns_end = ts;

        if self.reader_features.contains(ReaderFeatures::CYCLES_TOP) {
            sm.gpu_cycle = metadata.cycles.top;
        }
        if self
            .reader_features
            .contains(ReaderFeatures::CYCLES_SHADER_CORE)
        {
            sm.sc_cycle = metadata.cycles.shader_cores;
        }
        if sm.sc_cycle == 0 && sm.gpu_cycle != 0 {
            sm.sc_cycle = sm.gpu_cycle;
        }

        self.in_flight = true;
        Ok(SampleHandle::vinstr(metadata.metadata))
    }

    fn next<'s>(
        &'s self,
        sample: SampleHandle,
        cursor: &mut BlockHandle,
    ) -> Option<BlockMetadata<'s>> {
        let SampleSlot::Vinstr(metadata) = sample.0 else {
            return None;
        };

        let index = match cursor.0 {
            BlockCursor::Start => 0,
            BlockCursor::Vinstr(index) => index,
            _ => return None,
        };

        let Some(entry) = self.layout.get(index) else {
            cursor.0 = BlockCursor::Done;
            return None;
        };
        cursor.0 = BlockCursor::Vinstr(index + 1);

        let offset = self.buffer_size * metadata.buffer_idx as usize + entry.offset;
        let values_size = self.extents.block_values_size();
        if offset
            .checked_add(values_size)
            .map_or(true, |end| end > self.memory.len())
        {
            cursor.0 = BlockCursor::Done;
            return None;
        }
        let values =
            unsafe { std::slice::from_raw_parts(self.memory.as_ptr().add(offset), values_size) };

        Some(BlockMetadata {
            ty: entry.ty,
            index: entry.index,
            set: PrfcntSet::Primary,
            state: BlockState::default(),
            values,
        })
    }

    fn put_sample(&mut self, sample: SampleHandle) -> Result<()> {
        let SampleSlot::Vinstr(mut metadata) = sample.0 else {
            return Err(Error::InvalidHandle);
        };

        ioctl_argp(&self.syscall, self.fd.fd(), command::PUT_BUFFER, &mut metadata)?;
        self.in_flight = false;

        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        let syscall = self.syscall.clone();
        let clock = self.clock.clone();
        discard_impl(self, &syscall, &clock)
    }
}
