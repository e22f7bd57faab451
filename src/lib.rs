//! Hardware counter sampling for Arm Mali GPUs over the `kbase` kernel driver.
//!
//! The kbase driver exposes GPU performance counters through a character
//! device: control ioctls start and stop counter accumulation, and finished
//! samples are handed to user space through a memory-mapped ring buffer.
//! Two generations of that interface exist, `vinstr` (older job-manager
//! kernels) and `kinstr_prfcnt` (current kernels), and this crate drives
//! both behind one [`Reader`][hwcnt::Reader] contract.
//!
//! ## Example
//!
//! Take one manual sample and print the front-end counters.
//!
//! ```no_run
//! use kbase_hwcnt::config::{CounterConfig, EnableMap};
//! use kbase_hwcnt::hwcnt::{BlockType, PrfcntSet, Sample};
//! use kbase_hwcnt::instance::Instance;
//! use kbase_hwcnt::sampler::Manual;
//!
//! // The instance describes a device probed by the caller (see `instance`).
//! let instance: Instance = probe_device();
//!
//! let config = CounterConfig {
//!     ty: BlockType::Fe,
//!     set: PrfcntSet::Primary,
//!     enable: EnableMap::ALL,
//! };
//!
//! let mut sampler = Manual::new(&instance, &[config]).unwrap();
//! sampler.accumulation_start().unwrap();
//! run_workload();
//! sampler.request_sample(42).unwrap();
//!
//! let sample = Sample::new(sampler.reader()).unwrap();
//! println!("sample {}", sample.metadata().sample_nr);
//! for block in sample.blocks() {
//!     println!("{:?}[{}]: {} bytes", block.ty, block.index, block.values.len());
//! }
//! drop(sample); // hands the ring-buffer slot back to the kernel
//!
//! sampler.accumulation_stop(43).unwrap();
//! # fn probe_device() -> Instance { unimplemented!() }
//! # fn run_workload() {}
//! ```
//!
//! ## Kernel quirks
//!
//! The raw kernel protocol loses "stop" samples when the ring buffer is full
//! and can emit one spurious empty sample when stopping periodic collection.
//! The crate masks both defects with a session-tracking layer wrapped around
//! the kinstr_prfcnt backend; callers always observe exactly one sample per
//! stop, possibly a synthesized empty one with the `error` flag set.

pub mod config;
pub mod error;
mod ffi;
pub mod hwcnt;
pub mod instance;
mod ioctl;
pub mod sampler;

pub use error::{DecodeError, Error, Result};
pub use ffi::{LinuxSyscall, Syscall};
