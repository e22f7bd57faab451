//! Manual and periodic sampler front-ends.
//!
//! A sampler owns one backend, selected once at construction from the
//! counter interface generation the device probe reported. The set of
//! backends is closed: vinstr for legacy kernels, kinstr_prfcnt (behind its
//! workaround layer) for current ones.

use crate::config::{CounterConfig, Tunables};
use crate::error::{Error, Result};
use crate::ffi::{LinuxSyscall, Syscall};
use crate::hwcnt::{
    BlockExtents, BlockHandle, BlockMetadata, Features, Reader, SampleHandle, SampleMetadata,
};
use crate::instance::{CounterIface, Instance};

mod discard;
pub(crate) mod kinstr;
pub(crate) mod memory;
pub(crate) mod poll;
pub(crate) mod queue;
pub(crate) mod timestamp;
pub(crate) mod vinstr;

#[cfg(test)]
pub(crate) mod mock;

pub use timestamp::{Clock, MonotonicClock};

/// Validate a counter configuration against the advertised extents and
/// narrow the extents to the configured blocks.
pub(crate) fn filter_block_extents(
    advertised: &BlockExtents,
    configs: &[CounterConfig],
) -> Result<BlockExtents> {
    let mut num_blocks_of_type = [0u8; crate::hwcnt::BlockType::COUNT];

    for config in configs {
        if advertised.num_blocks_of_type(config.ty) == 0 {
            return Err(Error::Config("block type not advertised by this device"));
        }
        if num_blocks_of_type[config.ty as usize] != 0 {
            return Err(Error::Config("block type configured twice"));
        }
        num_blocks_of_type[config.ty as usize] = advertised.num_blocks_of_type(config.ty);
    }

    Ok(BlockExtents::new(
        num_blocks_of_type,
        advertised.counters_per_block(),
        advertised.values_type(),
    ))
}

/// The closed set of backend implementations.
pub(crate) enum BackendKind<S: Syscall, C: Clock> {
    Vinstr(vinstr::Backend<S, C>),
    Kinstr(kinstr::wa::WaBackend<S, C>),
}

impl<S: Syscall, C: Clock> BackendKind<S, C> {
    fn create(
        instance: &Instance,
        period_ns: u64,
        configs: &[CounterConfig],
        tunables: &Tunables,
        syscall: S,
        clock: C,
    ) -> Result<Self> {
        match instance.iface {
            CounterIface::Vinstr => {
                let args = vinstr::setup::setup(instance, period_ns, configs, tunables, &syscall)?;
                Ok(BackendKind::Vinstr(vinstr::Backend::new(
                    args, syscall, clock,
                )))
            }
            CounterIface::KinstrPrfcnt => {
                let args = kinstr::setup::setup(instance, period_ns, configs, &syscall)?;
                Ok(BackendKind::Kinstr(kinstr::wa::WaBackend::new(
                    args, tunables, clock,
                )?))
            }
        }
    }
}

impl<S: Syscall, C: Clock> Reader for BackendKind<S, C> {
    fn fd(&self) -> std::os::fd::RawFd {
        match self {
            BackendKind::Vinstr(b) => b.fd(),
            BackendKind::Kinstr(b) => b.fd(),
        }
    }

    fn features(&self) -> &Features {
        match self {
            BackendKind::Vinstr(b) => b.features(),
            BackendKind::Kinstr(b) => b.features(),
        }
    }

    fn block_extents(&self) -> &BlockExtents {
        match self {
            BackendKind::Vinstr(b) => b.block_extents(),
            BackendKind::Kinstr(b) => b.block_extents(),
        }
    }

    fn start(&mut self, user_data: u64) -> Result<()> {
        match self {
            BackendKind::Vinstr(b) => b.start(user_data),
            BackendKind::Kinstr(b) => b.start(user_data),
        }
    }

    fn stop(&mut self, user_data: u64) -> Result<()> {
        match self {
            BackendKind::Vinstr(b) => b.stop(user_data),
            BackendKind::Kinstr(b) => b.stop(user_data),
        }
    }

    fn request_sample(&mut self, user_data: u64) -> Result<()> {
        match self {
            BackendKind::Vinstr(b) => b.request_sample(user_data),
            BackendKind::Kinstr(b) => b.request_sample(user_data),
        }
    }

    fn get_sample(&mut self, sm: &mut SampleMetadata) -> Result<SampleHandle> {
        match self {
            BackendKind::Vinstr(b) => b.get_sample(sm),
            BackendKind::Kinstr(b) => b.get_sample(sm),
        }
    }

    fn next<'s>(
        &'s self,
        sample: SampleHandle,
        cursor: &mut BlockHandle,
    ) -> Option<BlockMetadata<'s>> {
        match self {
            BackendKind::Vinstr(b) => b.next(sample, cursor),
            BackendKind::Kinstr(b) => b.next(sample, cursor),
        }
    }

    fn put_sample(&mut self, sample: SampleHandle) -> Result<()> {
        match self {
            BackendKind::Vinstr(b) => b.put_sample(sample),
            BackendKind::Kinstr(b) => b.put_sample(sample),
        }
    }

    fn discard(&mut self) -> Result<()> {
        match self {
            BackendKind::Vinstr(b) => b.discard(),
            BackendKind::Kinstr(b) => b.discard(),
        }
    }
}

/// Sampler driven by explicit sample requests.
pub struct Manual<S: Syscall = LinuxSyscall, C: Clock = MonotonicClock> {
    backend: BackendKind<S, C>,
}

impl Manual {
    /// Configure manual sampling on a probed device.
    pub fn new(instance: &Instance, configs: &[CounterConfig]) -> Result<Self> {
        Self::with_parts(
            instance,
            configs,
            &Tunables::default(),
            LinuxSyscall,
            MonotonicClock,
        )
    }
}

impl<S: Syscall, C: Clock> Manual<S, C> {
    /// Configure manual sampling with explicit capacities, kernel access
    /// and clock.
    pub fn with_parts(
        instance: &Instance,
        configs: &[CounterConfig],
        tunables: &Tunables,
        syscall: S,
        clock: C,
    ) -> Result<Self> {
        Ok(Self {
            backend: BackendKind::create(instance, 0, configs, tunables, syscall, clock)?,
        })
    }

    /// Begin counter accumulation.
    pub fn accumulation_start(&mut self) -> Result<()> {
        self.backend.start(0)
    }

    /// Stop accumulation, flushing the final interval as one sample tagged
    /// with `user_data`.
    pub fn accumulation_stop(&mut self, user_data: u64) -> Result<()> {
        self.backend.stop(user_data)
    }

    /// Take a sample of the accumulated counter values.
    pub fn request_sample(&mut self, user_data: u64) -> Result<()> {
        self.backend.request_sample(user_data)
    }

    /// Reader for the samples this sampler produces.
    pub fn reader(&mut self) -> &mut dyn Reader {
        &mut self.backend
    }
}

/// Sampler driven by a kernel timer at a fixed period.
pub struct Periodic<S: Syscall = LinuxSyscall, C: Clock = MonotonicClock> {
    backend: BackendKind<S, C>,
}

impl Periodic {
    /// Configure periodic sampling on a probed device.
    pub fn new(instance: &Instance, period_ns: u64, configs: &[CounterConfig]) -> Result<Self> {
        Self::with_parts(
            instance,
            period_ns,
            configs,
            &Tunables::default(),
            LinuxSyscall,
            MonotonicClock,
        )
    }
}

impl<S: Syscall, C: Clock> Periodic<S, C> {
    /// Configure periodic sampling with explicit capacities, kernel access
    /// and clock.
    pub fn with_parts(
        instance: &Instance,
        period_ns: u64,
        configs: &[CounterConfig],
        tunables: &Tunables,
        syscall: S,
        clock: C,
    ) -> Result<Self> {
        if period_ns == 0 {
            return Err(Error::Config("period must be non-zero"));
        }
        Ok(Self {
            backend: BackendKind::create(instance, period_ns, configs, tunables, syscall, clock)?,
        })
    }

    /// Start periodic collection.
    pub fn sampling_start(&mut self, user_data: u64) -> Result<()> {
        self.backend.start(user_data)
    }

    /// Stop periodic collection; the final interval arrives as one more
    /// sample tagged with `user_data`.
    pub fn sampling_stop(&mut self, user_data: u64) -> Result<()> {
        self.backend.stop(user_data)
    }

    /// Reader for the samples this sampler produces.
    pub fn reader(&mut self) -> &mut dyn Reader {
        &mut self.backend
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hwcnt::{BlockType, PrfcntSet, SampleValuesType};

    fn advertised() -> BlockExtents {
        BlockExtents::new([1, 1, 2, 4, 0, 0], 64, SampleValuesType::U32)
    }

    fn config(ty: BlockType) -> CounterConfig {
        CounterConfig {
            ty,
            set: PrfcntSet::Primary,
            enable: crate::config::EnableMap::ALL,
        }
    }

    #[test]
    fn filter_narrows_to_configured_blocks() {
        let extents =
            filter_block_extents(&advertised(), &[config(BlockType::Fe), config(BlockType::Core)])
                .unwrap();
        assert_eq!(extents.num_blocks_of_type(BlockType::Fe), 1);
        assert_eq!(extents.num_blocks_of_type(BlockType::Core), 4);
        assert_eq!(extents.num_blocks_of_type(BlockType::Tiler), 0);
        assert_eq!(extents.counters_per_block(), 64);
    }

    #[test]
    fn filter_rejects_unadvertised_block() {
        assert!(matches!(
            filter_block_extents(&advertised(), &[config(BlockType::Firmware)]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn filter_rejects_duplicate_block() {
        assert!(matches!(
            filter_block_extents(&advertised(), &[config(BlockType::Fe), config(BlockType::Fe)]),
            Err(Error::Config(_))
        ));
    }
}
