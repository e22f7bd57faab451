use std::os::fd::RawFd;
use std::ptr::NonNull;

use crate::error::Result;
use crate::ffi::Syscall;

/// Owned counter file descriptor, closed on drop.
#[derive(Debug)]
pub(crate) struct FdGuard<S: Syscall> {
    fd: RawFd,
    syscall: S,
}

impl<S: Syscall> FdGuard<S> {
    pub fn new(fd: RawFd, syscall: S) -> Self {
        Self { fd, syscall }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl<S: Syscall> Drop for FdGuard<S> {
    fn drop(&mut self) {
        let _ = self.syscall.close(self.fd);
    }
}

/// Memory-mapped counter ring buffer, unmapped on drop.
///
/// The mapping is owned by the backend for its whole lifetime; samples hand
/// out borrows into it only between `get_sample` and `put_sample`.
#[derive(Debug)]
pub(crate) struct MappedMemory<S: Syscall> {
    ptr: NonNull<u8>,
    len: usize,
    syscall: S,
}

impl<S: Syscall> MappedMemory<S> {
    pub fn map(fd: RawFd, len: usize, syscall: S) -> Result<Self> {
        let ptr = syscall.mmap(fd, len)?;
        Ok(Self { ptr, len, syscall })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl<S: Syscall> Drop for MappedMemory<S> {
    fn drop(&mut self) {
        match unsafe { self.syscall.munmap(self.ptr, self.len) } {
            Ok(()) => (),
            Err(e) => panic!("failed to unmap counter buffer: {e}"),
        }
    }
}
