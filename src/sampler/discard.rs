use super::poll::ready_now;
use super::timestamp::Clock;
use crate::error::Result;
use crate::ffi::Syscall;
use crate::hwcnt::{Reader, SampleMetadata};

/// Consumer-side ring-buffer drain.
///
/// Reads and immediately releases buffered samples until the descriptor
/// stops signalling readiness. Samples stamped at or after the entry
/// snapshot end the loop early, which bounds the drain against a producer
/// that is still generating samples.
pub(crate) fn discard_impl<R, S, C>(reader: &mut R, syscall: &S, clock: &C) -> Result<()>
where
    R: Reader + ?Sized,
    S: Syscall,
    C: Clock,
{
    let now = clock.monotonic_ns();

    loop {
        if !ready_now(syscall, reader.fd())? {
            break;
        }

        let mut sm = SampleMetadata::default();
        let handle = reader.get_sample(&mut sm)?;
        reader.put_sample(handle)?;

        if sm.timestamp_ns_end >= now {
            break;
        }
    }

    Ok(())
}
