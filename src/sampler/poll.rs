use std::os::fd::RawFd;

use crate::error::{Error, Result};
use crate::ffi::Syscall;

/// Wait until the counter descriptor signals a ready sample.
pub(crate) fn wait_for_sample<S: Syscall>(syscall: &S, fd: RawFd) -> Result<()> {
    const WAIT_FOREVER: i32 = -1;

    if syscall.poll(fd, WAIT_FOREVER)? {
        Ok(())
    } else {
        Err(Error::Timeout)
    }
}

/// Non-blocking check whether a sample is ready to be read.
pub(crate) fn ready_now<S: Syscall>(syscall: &S, fd: RawFd) -> Result<bool> {
    const NO_WAIT: i32 = 0;

    Ok(syscall.poll(fd, NO_WAIT)?)
}
