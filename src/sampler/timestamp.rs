/// Monotonic timestamp source.
///
/// The workaround layer brackets kernel calls with timestamps to recognize
/// racing samples, so tests substitute a deterministic clock here.
pub trait Clock: Clone {
    /// Current monotonic time in nanoseconds.
    fn monotonic_ns(&self) -> u64;
}

/// Production clock reading `CLOCK_MONOTONIC_RAW`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn monotonic_ns(&self) -> u64 {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut now) };

        const NSEC_PER_SEC: u64 = 1_000_000_000;
        now.tv_sec as u64 * NSEC_PER_SEC + now.tv_nsec as u64
    }
}
