use std::io::{Error, Result};
use std::os::fd::RawFd;
use std::ptr::NonNull;

use super::Syscall;

/// Production [`Syscall`] implementation backed by libc.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    fn ioctl(&self, fd: RawFd, op: u64, arg: *mut libc::c_void) -> Result<i32> {
        let result = unsafe { libc::ioctl(fd, op as _, arg) };
        if result != -1 {
            Ok(result)
        } else {
            Err(Error::last_os_error())
        }
    }

    fn ioctl_val(&self, fd: RawFd, op: u64, arg: u64) -> Result<i32> {
        let result = unsafe { libc::ioctl(fd, op as _, arg) };
        if result != -1 {
            Ok(result)
        } else {
            Err(Error::last_os_error())
        }
    }

    fn poll(&self, fd: RawFd, timeout_ms: i32) -> Result<bool> {
        let mut fds = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let nelems = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if nelems != -1 {
            Ok(nelems == 1)
        } else {
            Err(Error::last_os_error())
        }
    }

    fn mmap(&self, fd: RawFd, len: usize) -> Result<NonNull<u8>> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                fd,
                0,
            )
        };
        if ptr != libc::MAP_FAILED {
            // MAP_FAILED is the only error value, so the cast cannot be null.
            Ok(unsafe { NonNull::new_unchecked(ptr.cast()) })
        } else {
            Err(Error::last_os_error())
        }
    }

    unsafe fn munmap(&self, ptr: NonNull<u8>, len: usize) -> Result<()> {
        let result = libc::munmap(ptr.as_ptr().cast(), len);
        if result != -1 {
            Ok(())
        } else {
            Err(Error::last_os_error())
        }
    }

    fn close(&self, fd: RawFd) -> Result<()> {
        let result = unsafe { libc::close(fd) };
        if result != -1 {
            Ok(())
        } else {
            Err(Error::last_os_error())
        }
    }
}
