use std::io::Result;
use std::os::fd::RawFd;
use std::ptr::NonNull;

pub mod syscall;

pub use syscall::LinuxSyscall;

// asm-generic ioctl encoding:
// https://github.com/torvalds/linux/blob/v6.13/include/uapi/asm-generic/ioctl.h
const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;

const fn ioc(dir: u64, ty: u64, nr: u64, size: usize) -> u64 {
    (dir << 30) | ((size as u64) << 16) | (ty << 8) | nr
}

pub(crate) const fn ior<T>(ty: u64, nr: u64) -> u64 {
    ioc(IOC_READ, ty, nr, size_of::<T>())
}

pub(crate) const fn iow<T>(ty: u64, nr: u64) -> u64 {
    ioc(IOC_WRITE, ty, nr, size_of::<T>())
}

pub(crate) const fn iowr<T>(ty: u64, nr: u64) -> u64 {
    ioc(IOC_READ | IOC_WRITE, ty, nr, size_of::<T>())
}

/// Kernel access used by the sampling backends.
///
/// Everything the backends do to the device goes through this trait, so the
/// whole protocol can be exercised against a scripted implementation in
/// tests. Implementations are cheap handles and are copied into every
/// component that needs kernel access, hence the `Clone` bound.
pub trait Syscall: Clone {
    /// Issue an ioctl with a pointer argument (or no argument).
    ///
    /// Returns the (non-negative) ioctl result. Some setup ioctls use it to
    /// return a new file descriptor.
    fn ioctl(&self, fd: RawFd, op: u64, arg: *mut libc::c_void) -> Result<i32>;

    /// Issue an ioctl whose argument is an integer value, not a pointer.
    fn ioctl_val(&self, fd: RawFd, op: u64, arg: u64) -> Result<i32>;

    /// Poll `fd` for readable data. `timeout_ms < 0` waits forever.
    ///
    /// Returns whether the descriptor is ready.
    fn poll(&self, fd: RawFd, timeout_ms: i32) -> Result<bool>;

    /// Map `len` bytes of the counter buffer read-only.
    fn mmap(&self, fd: RawFd, len: usize) -> Result<NonNull<u8>>;

    /// Unmap a region previously obtained from [`Syscall::mmap`].
    ///
    /// # Safety
    ///
    /// `ptr`/`len` must denote exactly one prior `mmap` result, and no
    /// references into the mapping may outlive the call.
    unsafe fn munmap(&self, ptr: NonNull<u8>, len: usize) -> Result<()>;

    /// Close a file descriptor owned by the backend.
    fn close(&self, fd: RawFd) -> Result<()>;
}

/// Typed pointer-argument ioctl.
pub(crate) fn ioctl_argp<S: Syscall, T>(s: &S, fd: RawFd, op: u64, argp: &mut T) -> Result<i32> {
    s.ioctl(fd, op, (argp as *mut T).cast())
}
