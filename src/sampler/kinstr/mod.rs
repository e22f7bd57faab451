//! Backend for the current `kinstr_prfcnt` counter interface.
//!
//! Unlike vinstr, every sample carries its own layout: the `GET_SAMPLE`
//! handle points at a strided metadata item list inside the mapping, and the
//! [`parse`] decoder runs over it on every acquisition. Control operations
//! are all issued through one `ISSUE_COMMAND` ioctl.
//!
//! This raw backend is not used directly; [`wa::WaBackend`] wraps it to mask
//! known kernel defects.

use std::os::fd::RawFd;

use remap::BlockIndexRemap;

use crate::error::{DecodeError, Error, Result};
use crate::ffi::{ioctl_argp, Syscall};
use crate::hwcnt::reader::{BlockCursor, SampleSlot};
use crate::hwcnt::{
    BlockExtents, BlockHandle, BlockMetadata, Features, SampleHandle, SampleMetadata,
};
use crate::ioctl::kinstr::{
    command, ControlCmd, SampleAccess, CMD_DISCARD, CMD_SAMPLE_SYNC, CMD_START, CMD_STOP,
};
use crate::sampler::memory::{FdGuard, MappedMemory};
use crate::sampler::poll::{ready_now, wait_for_sample};

pub(crate) mod parse;
pub(crate) mod remap;
pub(crate) mod setup;
#[cfg(test)]
mod test;
pub(crate) mod wa;

pub(crate) struct Backend<S: Syscall> {
    fd: FdGuard<S>,
    syscall: S,
    features: Features,
    extents: BlockExtents,
    metadata_item_size: usize,
    memory: MappedMemory<S>,
    period_ns: u64,
    remap: Option<BlockIndexRemap>,
    in_flight: bool,
}

impl<S: Syscall> Backend<S> {
    pub fn new(args: setup::Args<S>) -> Self {
        // Dense shader core masks need no remapping; a sparse one installs
        // the workaround for the kernel's physical-slot indices.
        let remap = Some(BlockIndexRemap::new(args.sc_mask));

        Self {
            fd: args.fd,
            syscall: args.syscall,
            features: args.features,
            extents: args.extents,
            metadata_item_size: args.metadata_item_size,
            memory: args.memory,
            period_ns: args.period_ns,
            remap,
            in_flight: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd.fd()
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn block_extents(&self) -> &BlockExtents {
        &self.extents
    }

    pub fn is_periodic(&self) -> bool {
        self.period_ns != 0
    }

    pub fn syscall(&self) -> &S {
        &self.syscall
    }

    fn issue_command(&mut self, cmd: u16, user_data: u64) -> Result<()> {
        let mut command = ControlCmd {
            cmd,
            user_data,
            ..Default::default()
        };
        ioctl_argp(
            &self.syscall,
            self.fd.fd(),
            command::ISSUE_COMMAND,
            &mut command,
        )?;
        Ok(())
    }

    pub fn start(&mut self, user_data: u64) -> Result<()> {
        self.issue_command(CMD_START, user_data)
    }

    pub fn stop(&mut self, user_data: u64) -> Result<()> {
        self.issue_command(CMD_STOP, user_data)
    }

    pub fn request_sample(&mut self, user_data: u64) -> Result<()> {
        self.issue_command(CMD_SAMPLE_SYNC, user_data)
    }

    /// Kernel-side discard of unconsumed samples.
    pub fn discard(&mut self) -> Result<()> {
        self.issue_command(CMD_DISCARD, 0)
    }

    /// Non-blocking readiness check of the counter descriptor.
    pub fn ready_now(&self) -> Result<bool> {
        ready_now(&self.syscall, self.fd.fd())
    }

    pub fn get_sample(&mut self, sm: &mut SampleMetadata) -> Result<SampleHandle> {
        if self.in_flight {
            return Err(Error::SampleInFlight);
        }

        wait_for_sample(&self.syscall, self.fd.fd())?;

        let mut access = SampleAccess::default();
        ioctl_argp(&self.syscall, self.fd.fd(), command::GET_SAMPLE, &mut access)?;

        // The offset comes from the kernel; never walk past the mapping.
        let window = (self.extents.num_blocks() + 3) * self.metadata_item_size;
        let list_end = (access.metadata_offset as usize).checked_add(window);
        if list_end.map_or(true, |end| end > self.memory.len()) {
            let _ = self.put_sample(SampleHandle::kinstr(access));
            return Err(DecodeError::MetadataOutOfBounds.into());
        }

        let decoded = unsafe {
            parse::parse_sample_metadata(
                self.memory.as_ptr().add(access.metadata_offset as usize),
                self.metadata_item_size,
                &self.extents,
                self.remap.as_ref(),
                sm,
            )
        };

        if let Err(e) = decoded {
            // Hand the slot back before surfacing the decode error so the
            // caller cannot leak it. `sm` keeps its partial fields.
            let _ = self.put_sample(SampleHandle::kinstr(access));
            return Err(e.into());
        }

        self.in_flight = true;
        Ok(SampleHandle::kinstr(access))
    }

    pub fn next<'s>(
        &'s self,
        sample: SampleHandle,
        cursor: &mut BlockHandle,
    ) -> Option<BlockMetadata<'s>> {
        let SampleSlot::Kinstr(access) = sample.0 else {
            return None;
        };

        let offset = match cursor.0 {
            BlockCursor::Start => access.metadata_offset,
            BlockCursor::Kinstr(offset) => offset,
            _ => return None,
        };

        let Some((record, next_offset)) = (unsafe {
            parse::find_block_record(
                self.memory.as_ptr(),
                self.memory.len(),
                offset,
                self.metadata_item_size,
            )
        }) else {
            cursor.0 = BlockCursor::Done;
            return None;
        };
        cursor.0 = BlockCursor::Kinstr(next_offset);

        // The record list was validated at acquisition time, so the
        // conversions cannot fail here.
        let ty = parse::block_type_from_wire(record.ty).ok()?;
        let mut index = record.block_idx;
        if let Some(remap) = &self.remap {
            index = remap.remap(ty, record.block_idx).ok()?;
        }

        let values_size = self.extents.block_values_size();
        let values_offset = record.values_offset as usize;
        if values_offset
            .checked_add(values_size)
            .map_or(true, |end| end > self.memory.len())
        {
            cursor.0 = BlockCursor::Done;
            return None;
        }
        let values = unsafe {
            std::slice::from_raw_parts(self.memory.as_ptr().add(values_offset), values_size)
        };

        Some(BlockMetadata {
            ty,
            index,
            set: parse::set_from_wire(record.set).ok()?,
            state: parse::block_state_from_wire(record.block_state),
            values,
        })
    }

    pub fn put_sample(&mut self, sample: SampleHandle) -> Result<()> {
        let SampleSlot::Kinstr(mut access) = sample.0 else {
            return Err(Error::InvalidHandle);
        };

        ioctl_argp(&self.syscall, self.fd.fd(), command::PUT_SAMPLE, &mut access)?;
        self.in_flight = false;

        Ok(())
    }
}
