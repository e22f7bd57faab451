//! Workaround backend wrapping [`Backend`].
//!
//! Three kernel defects are masked here, without kernel changes:
//!
//!  1. When the sample buffer is full and `stop` is called, the implicit
//!     stop sample is silently dropped and no error is returned.
//!  2. Stopping a periodic session races the sampling timer; the race can
//!     produce one spurious, undecodable sample.
//!  3. Shader core block indices follow the physical core slots instead of
//!     being contiguous (handled by the remap table inside [`Backend`]).
//!
//! In manual mode the true ring capacity is probed at construction and one
//! slot is kept permanently reserved for the stop command, which fixes #1;
//! #2 does not apply. In periodic mode each start/stop pair becomes a
//! tracked *session*. The session number rides in the user data sent to the
//! kernel (top bit marking stop samples, the next bit keep-alive samples)
//! and the caller's own user data is substituted back on delivery. When the
//! stop sample of the oldest session is recognized as lost, an empty sample
//! with the `error` flag set is synthesized in its place (#1), and samples
//! produced by the stop race are recognized by their timestamp window and
//! absorbed (#2). This is the only error class this layer absorbs; every
//! other failure propagates.

use log::{debug, warn};

use super::{setup, Backend};
use crate::config::Tunables;
use crate::error::{Error, Result};
use crate::ffi::Syscall;
use crate::hwcnt::{
    BlockExtents, BlockHandle, BlockMetadata, Features, Reader, SampleHandle, SampleMetadata,
};
use crate::sampler::discard::discard_impl;
use crate::sampler::queue::BoundedQueue;
use crate::sampler::timestamp::Clock;

/// User data bit marking stop samples.
const STOP_BIT: u64 = 1 << 63;
/// User data bit marking keep-alive samples.
const KEEP_BIT: u64 = 1 << 62;
/// Session number mask within a user data value.
const SESSION_NR_MASK: u64 = !(STOP_BIT | KEEP_BIT);

/// Periodic session state.
#[derive(Clone, Copy, Debug, Default)]
struct Session {
    /// Session number, as packed into the kernel-visible user data.
    session_nr: u64,
    /// Caller's user data from `start`.
    their_user_data_start: u64,
    /// Caller's user data from `stop`.
    their_user_data_stop: u64,
    /// Session start timestamp, or the last delivered sample's timestamp.
    last_ts: u64,
    /// Timestamp taken just before the stop call.
    end_begin_ts: u64,
    /// Timestamp taken just after the stop call.
    end_end_ts: u64,
    /// Timestamp taken just before the keep-alive stop call.
    keep_end_begin_ts: u64,
    /// Timestamp taken just after the keep-alive stop call.
    keep_end_end_ts: u64,
    /// A stop race was detected for this session.
    had_error: bool,
}

impl Session {
    fn new(session_nr: u64, user_data: u64, timestamp_ns: u64) -> Self {
        Session {
            session_nr: session_nr & SESSION_NR_MASK,
            their_user_data_start: user_data,
            last_ts: timestamp_ns,
            ..Default::default()
        }
    }

    /// Kernel-visible user data for the start command.
    fn our_user_data_start(&self) -> u64 {
        self.session_nr
    }

    /// Kernel-visible user data for the stop command.
    fn our_user_data_stop(&self) -> u64 {
        self.session_nr | STOP_BIT
    }

    /// Kernel-visible user data for the keep-alive start command.
    fn our_user_data_keep(&self) -> u64 {
        self.session_nr | KEEP_BIT
    }

    /// Kernel-visible user data for the keep-alive stop command.
    fn our_user_data_keep_stop(&self) -> u64 {
        self.session_nr | KEEP_BIT | STOP_BIT
    }

    /// Track the session stop and the timestamps bracketing the kernel call.
    fn stop(&mut self, user_data: u64, end_begin_ts: u64, end_end_ts: u64) {
        debug_assert!(end_begin_ts < end_end_ts);

        self.end_begin_ts = end_begin_ts;
        self.end_end_ts = end_end_ts;
        self.their_user_data_stop = user_data;

        debug_assert!(self.is_stopped());
    }

    /// Track the keep-alive stop timestamps.
    fn keep_stop(&mut self, end_begin_ts: u64, end_end_ts: u64) {
        debug_assert!(end_begin_ts < end_end_ts);

        self.keep_end_begin_ts = end_begin_ts;
        self.keep_end_end_ts = end_end_ts;
    }

    /// Classify a failed `get_sample` against this session's stop windows.
    ///
    /// A sample whose user data and end timestamp place it inside the stop
    /// (or keep-alive stop) call window is the stop race in action; mark the
    /// session so its stop sample gets replaced.
    fn on_error(&mut self, sm: &SampleMetadata) -> bool {
        if !self.is_stopped() {
            return false;
        }

        let ts = sm.timestamp_ns_end;

        if sm.user_data == self.our_user_data_start()
            && (self.end_begin_ts..=self.end_end_ts).contains(&ts)
        {
            self.had_error = true;
            return true;
        }

        if sm.user_data == self.our_user_data_keep()
            && (self.keep_end_begin_ts..=self.keep_end_end_ts).contains(&ts)
        {
            self.had_error = true;
            return true;
        }

        false
    }

    fn update_ts(&mut self, timestamp_ns: u64) {
        debug_assert!(self.last_ts < timestamp_ns);
        self.last_ts = timestamp_ns;
    }

    fn is_stopped(&self) -> bool {
        self.end_end_ts != 0
    }

    /// Metadata of the empty sample replacing a lost stop sample: no
    /// counter data, the `error` flag, and the span from the last delivered
    /// sample to the stop time.
    fn empty_sample_metadata(&self) -> SampleMetadata {
        SampleMetadata {
            user_data: self.their_user_data_stop,
            flags: crate::hwcnt::SampleFlags {
                stretched: false,
                error: true,
            },
            timestamp_ns_begin: self.last_ts,
            timestamp_ns_end: self.end_end_ts,
            ..Default::default()
        }
    }

    /// Distance from this session to the session a user data value names.
    fn session_nr_diff(&self, our_user_data: u64) -> u64 {
        (our_user_data & SESSION_NR_MASK).wrapping_sub(self.session_nr)
    }
}

pub(crate) struct WaBackend<S: Syscall, C: Clock> {
    inner: Backend<S>,
    clock: C,
    /// An accumulation session is active.
    active: bool,
    /// Sample number allocator for delivered samples.
    sample_nr: u64,
    /// Probed ring capacity (manual mode only).
    num_buffers_max: u64,
    /// Free ring slots (manual mode only).
    num_buffers: u64,
    /// Sample read ahead of its turn while recognizing a lost stop sample.
    stash: Option<(SampleMetadata, SampleHandle)>,
    /// A synthesized empty sample is checked out.
    empty_sample: bool,
    /// Pending periodic sessions, oldest first.
    sessions: BoundedQueue<Session>,
    max_sessions: usize,
}

impl<S: Syscall, C: Clock> WaBackend<S, C> {
    pub fn new(args: setup::Args<S>, tunables: &Tunables, clock: C) -> Result<Self> {
        let mut backend = Self {
            inner: Backend::new(args),
            clock,
            active: false,
            sample_nr: 0,
            num_buffers_max: 0,
            num_buffers: 0,
            stash: None,
            empty_sample: false,
            sessions: BoundedQueue::new(tunables.max_sessions),
            max_sessions: tunables.max_sessions,
        };

        if !backend.inner.is_periodic() {
            backend.num_buffers_max = backend.probe_num_buffers(tunables.probe_limit)?;
            backend.num_buffers = backend.num_buffers_max;
            debug!("probed ring capacity: {} slots", backend.num_buffers_max);
        }

        Ok(backend)
    }

    /// Measure the ring capacity by requesting samples until the kernel
    /// refuses one, then flush everything the probe produced.
    fn probe_num_buffers(&mut self, probe_limit: u64) -> Result<u64> {
        let mut result = 0;

        self.inner.start(0)?;

        while result <= probe_limit {
            if self.inner.request_sample(0).is_err() {
                break;
            }
            result += 1;
        }

        // The stop sample is dropped here (the ring is full), which is
        // exactly the defect the reservation below guards against.
        self.inner.stop(0)?;
        self.inner.discard()?;

        Ok(result)
    }

    fn start_manual(&mut self, user_data: u64) -> Result<()> {
        if self.num_buffers == 0 {
            return Err(Error::NotPermitted);
        }
        self.inner.start(user_data)
    }

    fn stop_manual(&mut self, user_data: u64) -> Result<()> {
        self.inner.stop(user_data)?;

        debug_assert!(self.num_buffers >= 1);
        self.num_buffers -= 1;

        Ok(())
    }

    fn start_periodic(&mut self, user_data: u64) -> Result<()> {
        if self.sessions.is_full() {
            return Err(Error::NotPermitted);
        }

        let begin_ts = self.clock.monotonic_ns();
        let session = Session::new(self.sessions.push_count(), user_data, begin_ts);

        self.inner.start(session.our_user_data_start())?;
        self.sessions.push(session);

        Ok(())
    }

    fn stop_periodic(&mut self, user_data: u64) -> Result<()> {
        let Some(session) = self.sessions.back() else {
            debug_assert!(false, "active periodic backend with no session");
            return Ok(());
        };
        let stop_tag = session.our_user_data_stop();

        let end_begin_ts = self.clock.monotonic_ns();
        self.inner.stop(stop_tag)?;
        let end_end_ts = self.clock.monotonic_ns();

        if let Some(session) = self.sessions.back_mut() {
            session.stop(user_data, end_begin_ts, end_end_ts);
        }

        Ok(())
    }

    fn get_sample_periodic(&mut self, sm: &mut SampleMetadata) -> Result<SampleHandle> {
        debug_assert!(!self.empty_sample);

        loop {
            *sm = SampleMetadata::default();

            let got = match self.stash.take() {
                Some((metadata, handle)) => {
                    *sm = metadata;
                    Ok(handle)
                }
                None => self.inner.get_sample(sm),
            };

            let handle = match got {
                Ok(handle) => handle,
                Err(e) => {
                    // The failure may be the stop race leaving a garbage
                    // sample behind; if so, absorb it and read again.
                    if self.detect_stop_race(sm) {
                        continue;
                    }
                    return Err(e);
                }
            };

            let Some(session) = self.sessions.front() else {
                // A sample with no session to attribute it to; nothing this
                // layer can substitute.
                self.inner.put_sample(handle)?;
                return Err(Error::InvalidMode);
            };
            let session = *session;

            if sm.user_data == session.our_user_data_start() {
                // A periodic sample of the oldest session.
                sm.user_data = session.their_user_data_start;
                if let Some(front) = self.sessions.front_mut() {
                    front.update_ts(sm.timestamp_ns_end);
                }
                return Ok(handle);
            } else if sm.user_data == session.our_user_data_stop() {
                // The session's stop sample.
                if session.had_error {
                    // The session raced its stop; the data is invalid.
                    self.inner.put_sample(handle)?;
                    self.sessions.pop();
                    return Ok(self.take_empty_sample(&session, sm));
                }
                sm.user_data = session.their_user_data_stop;
                self.sessions.pop();
                return Ok(handle);
            } else if sm.user_data == session.our_user_data_keep() {
                // A periodic sample of the keep-alive session; internal
                // only, never delivered.
                self.inner.put_sample(handle)?;
                continue;
            } else if sm.user_data == session.our_user_data_keep_stop() {
                // The keep-alive session's stop sample; the real stop
                // sample is confirmed lost.
                self.inner.put_sample(handle)?;
                self.sessions.pop();
                return Ok(self.take_empty_sample(&session, sm));
            } else {
                // A sample of a later session: this session's stop sample
                // was dropped. Keep the sample for the next call and
                // deliver the replacement first.
                debug_assert!(
                    session.session_nr_diff(sm.user_data) < self.max_sessions as u64
                );
                warn!(
                    "stop sample of session {} was lost, synthesizing",
                    session.session_nr
                );

                self.stash = Some((*sm, handle));
                self.sessions.pop();
                return Ok(self.take_empty_sample(&session, sm));
            }
        }
    }

    /// Scan pending sessions for a stop window containing the failed
    /// sample. Matching marks the session raced.
    fn detect_stop_race(&mut self, sm: &SampleMetadata) -> bool {
        self.sessions.iter_mut().any(|session| session.on_error(sm))
    }

    /// Check out a synthesized empty sample in place of a lost stop sample.
    fn take_empty_sample(&mut self, session: &Session, sm: &mut SampleMetadata) -> SampleHandle {
        debug_assert!(!self.empty_sample);

        *sm = session.empty_sample_metadata();
        self.empty_sample = true;

        SampleHandle::synthetic()
    }

    fn put_sample_periodic(&mut self, handle: SampleHandle) -> Result<()> {
        if handle.is_synthetic() {
            if !self.empty_sample {
                return Err(Error::InvalidHandle);
            }
            self.empty_sample = false;
        } else {
            self.inner.put_sample(handle)?;
        }

        let Some(session) = self.sessions.back() else {
            return Ok(());
        };
        if !session.is_stopped() {
            return Ok(());
        }
        let keep = session.our_user_data_keep();
        let keep_stop = session.our_user_data_keep_stop();

        // Stop is synchronous, so a non-empty ring means the stop sample
        // (or more data before it) is still there to observe.
        if self.inner.ready_now()? {
            return Ok(());
        }

        // The ring went silent before the stop sample was seen: it was
        // lost. An extra start/stop pair forces one more observable sample
        // so the descriptor keeps signalling until the loss is recognized
        // and the synthetic replacement delivered. Back-to-back start/stop
        // on an empty ring cannot overflow, so this stop sample survives.
        self.inner.start(keep)?;

        let end_begin_ts = self.clock.monotonic_ns();
        self.inner.stop(keep_stop)?;
        let end_end_ts = self.clock.monotonic_ns();

        if let Some(session) = self.sessions.back_mut() {
            session.keep_stop(end_begin_ts, end_end_ts);
        }

        Ok(())
    }
}

impl<S: Syscall, C: Clock> Reader for WaBackend<S, C> {
    fn fd(&self) -> std::os::fd::RawFd {
        self.inner.fd()
    }

    fn features(&self) -> &Features {
        self.inner.features()
    }

    fn block_extents(&self) -> &BlockExtents {
        self.inner.block_extents()
    }

    fn start(&mut self, user_data: u64) -> Result<()> {
        if self.active {
            return Ok(());
        }

        if self.inner.is_periodic() {
            self.start_periodic(user_data)?;
        } else {
            self.start_manual(user_data)?;
        }

        self.active = true;
        Ok(())
    }

    fn stop(&mut self, user_data: u64) -> Result<()> {
        if !self.active {
            return Ok(());
        }

        if self.inner.is_periodic() {
            self.stop_periodic(user_data)?;
        } else {
            self.stop_manual(user_data)?;
        }

        self.active = false;
        Ok(())
    }

    fn request_sample(&mut self, user_data: u64) -> Result<()> {
        if self.inner.is_periodic() {
            return Err(Error::InvalidMode);
        }

        // Keep one slot reserved so the stop command can always flush.
        if self.num_buffers <= 1 {
            return Err(Error::NotPermitted);
        }

        self.inner.request_sample(user_data)?;
        self.num_buffers -= 1;

        Ok(())
    }

    fn get_sample(&mut self, sm: &mut SampleMetadata) -> Result<SampleHandle> {
        if self.empty_sample {
            return Err(Error::SampleInFlight);
        }

        let handle = if self.inner.is_periodic() {
            self.get_sample_periodic(sm)?
        } else {
            self.inner.get_sample(sm)?
        };

        // Session bookkeeping reorders and filters kernel samples, so the
        // kernel's own numbering cannot be exposed.
        sm.sample_nr = self.sample_nr;
        self.sample_nr += 1;

        Ok(handle)
    }

    fn next<'s>(
        &'s self,
        sample: SampleHandle,
        cursor: &mut BlockHandle,
    ) -> Option<BlockMetadata<'s>> {
        // A synthesized empty sample has no counter data at all.
        if sample.is_synthetic() {
            return None;
        }

        self.inner.next(sample, cursor)
    }

    fn put_sample(&mut self, sample: SampleHandle) -> Result<()> {
        if self.inner.is_periodic() {
            return self.put_sample_periodic(sample);
        }

        self.inner.put_sample(sample)?;

        self.num_buffers += 1;
        debug_assert!(self.num_buffers <= self.num_buffers_max);

        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        let syscall = self.inner.syscall().clone();
        let clock = self.clock.clone();
        discard_impl(self, &syscall, &clock)
    }
}
