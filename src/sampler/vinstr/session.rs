/// Vinstr profiling session state.
///
/// Every session stop results in one manual dump; the session record lives
/// until that dump's sample is parsed.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Session {
    /// Session start timestamp, or the last sample's timestamp.
    last_ts_ns: u64,
    /// User data for periodic samples of this session.
    user_data_periodic: u64,
    /// `stop` was called but its sample may not be parsed yet.
    pending_stop: bool,
    /// Number of the manual dump taken when this session stopped.
    stop_sample_nr: u64,
}

impl Session {
    pub fn new(start_ts_ns: u64, user_data_periodic: u64) -> Self {
        Self {
            last_ts_ns: start_ts_ns,
            user_data_periodic,
            pending_stop: false,
            stop_sample_nr: 0,
        }
    }

    /// Store a new last timestamp and return the previous one.
    pub fn update_ts(&mut self, ts: u64) -> u64 {
        debug_assert!(self.last_ts_ns < ts);
        std::mem::replace(&mut self.last_ts_ns, ts)
    }

    /// User data for periodic samples.
    pub fn user_data_periodic(&self) -> u64 {
        self.user_data_periodic
    }

    /// Track the session stop and the manual dump number that goes with it.
    pub fn stop(&mut self, stop_sample_nr: u64) {
        self.pending_stop = true;
        self.stop_sample_nr = stop_sample_nr;
    }

    /// Whether this session can be erased once manual dump
    /// `manual_sample_nr` has been parsed.
    pub fn can_erase(&self, manual_sample_nr: u64) -> bool {
        self.pending_stop && manual_sample_nr == self.stop_sample_nr
    }
}
