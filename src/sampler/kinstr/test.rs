//! kinstr_prfcnt backend and workaround-layer tests against a scripted
//! kernel.
//!
//! The mock keeps a real slot ring and a real item list per sample, so the
//! backend decodes exactly what a kernel would hand it, including the
//! defects the workaround layer exists for: stop samples silently dropped
//! on a full ring, and undecodable samples produced by the stop race.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::rc::Rc;

use super::parse::test::{
    block_record, clock_record, enum_block, enum_request, enum_sample_info, push_item,
    sample_record, TEST_STRIDE,
};
use super::setup;
use super::wa::WaBackend;
use crate::config::{CounterConfig, EnableMap, Tunables};
use crate::error::Error;
use crate::ffi::Syscall;
use crate::hwcnt::{BlockHandle, BlockType, PrfcntSet, Reader, Sample, SampleMetadata};
use crate::instance::{BlockStateSupport, CounterIface, GpuConstants, Instance};
use crate::ioctl::kbase::{KinstrPrfcntEnumInfo, KinstrPrfcntSetup, KinstrPrfcntSetupOut};
use crate::ioctl::kinstr::{
    self, item_type, ControlCmd, SampleAccess, CMD_DISCARD, CMD_SAMPLE_SYNC, CMD_START, CMD_STOP,
};
use crate::ioctl::kbase;
use crate::sampler::mock::MockClock;

/// Counter values per block the mock advertises. Small on purpose.
const NUM_VALUES: u16 = 4;
const VALUES_SIZE: usize = NUM_VALUES as usize * 8;

const COUNTER_FD: RawFd = 100;
const DEVICE_FD: RawFd = 5;

struct State {
    counts: [u8; BlockType::COUNT],
    sc_mask: u64,
    /// Ring slots not holding a sample.
    free_slots: Vec<usize>,
    /// Samples dumped but not yet fetched, oldest first.
    pending: VecDeque<(u64, usize)>,
    /// Samples fetched but not yet put, as (sequence, slot).
    held: Vec<(u64, usize)>,
    mapping: Box<[u8]>,
    started: bool,
    last_start_user_data: u64,
    last_emit_ts: u64,
    seq_alloc: u64,
    /// Silently drop the sample of the next stop command (defect 1).
    drop_next_stop: bool,
    /// Precede the next stop sample with an undecodable racing sample
    /// (defect 2).
    race_next_stop: bool,
}

/// Scripted kinstr_prfcnt kernel.
#[derive(Clone)]
pub(super) struct KinstrMock {
    state: Rc<RefCell<State>>,
    clock: MockClock,
}

impl KinstrMock {
    pub fn new(capacity: usize, counts: [u8; BlockType::COUNT], sc_mask: u64, clock: &MockClock) -> Self {
        let num_blocks: usize = counts.iter().map(|&n| n as usize).sum();
        let slot_size = Self::slot_size(num_blocks);

        KinstrMock {
            state: Rc::new(RefCell::new(State {
                counts,
                sc_mask,
                free_slots: (0..capacity).collect(),
                pending: VecDeque::new(),
                held: Vec::new(),
                mapping: vec![0; capacity * slot_size].into_boxed_slice(),
                started: false,
                last_start_user_data: 0,
                last_emit_ts: 0,
                seq_alloc: 0,
                drop_next_stop: false,
                race_next_stop: false,
            })),
            clock: clock.clone(),
        }
    }

    fn slot_size(num_blocks: usize) -> usize {
        (num_blocks + 3) * TEST_STRIDE + num_blocks * VALUES_SIZE
    }

    pub fn drop_next_stop(&self) {
        self.state.borrow_mut().drop_next_stop = true;
    }

    pub fn race_next_stop(&self) {
        self.state.borrow_mut().race_next_stop = true;
    }

    /// Number of samples sitting in the ring (fetched or not).
    pub fn occupied(&self) -> usize {
        let state = self.state.borrow();
        state.pending.len() + state.held.len()
    }

    /// Kernel timer tick: dump one periodic sample for the running session.
    pub fn tick(&self) {
        let mut state = self.state.borrow_mut();
        assert!(state.started, "tick without a running session");
        let user_data = state.last_start_user_data;
        self.emit(&mut state, user_data);
    }

    /// Dump one well-formed sample, or drop it silently if the ring is full.
    fn emit(&self, state: &mut State, user_data: u64) {
        let Some(slot) = state.free_slots.pop() else {
            return;
        };

        let num_blocks: usize = state.counts.iter().map(|&n| n as usize).sum();
        let slot_size = Self::slot_size(num_blocks);
        let slot_base = slot * slot_size;
        let values_base = slot_base + (num_blocks + 3) * TEST_STRIDE;

        let seq = state.seq_alloc;
        state.seq_alloc += 1;
        let ts_begin = state.last_emit_ts;
        let ts_end = self.clock.stamp();
        state.last_emit_ts = ts_end;

        let mut items = Vec::new();
        push_item(
            &mut items,
            item_type::METADATA_SAMPLE,
            &sample_record(ts_begin, ts_end, seq, user_data, 0),
        );
        push_item(
            &mut items,
            item_type::METADATA_CLOCK,
            &clock_record(&[1000 + seq, 900 + seq]),
        );

        let mut block_nr = 0usize;
        for (type_idx, &count) in state.counts.iter().enumerate() {
            let ty = type_idx as u8;
            let indices: Vec<u8> = if ty == kinstr::BLOCK_TYPE_SHADER_CORE {
                // The kernel reports physical core slots, not dense indices.
                (0..64).filter(|slot| state.sc_mask & (1 << slot) != 0).collect()
            } else {
                (0..count).collect()
            };
            assert_eq!(indices.len(), count as usize);

            for index in indices {
                let values_offset = (values_base + block_nr * VALUES_SIZE) as u32;
                push_item(
                    &mut items,
                    item_type::METADATA_BLOCK,
                    &block_record(ty, index, 0b1, values_offset),
                );
                state.mapping[values_offset as usize..values_offset as usize + VALUES_SIZE]
                    .fill(seq as u8 + 1);
                block_nr += 1;
            }
        }
        push_item(&mut items, item_type::NONE, &[]);

        state.mapping[slot_base..slot_base + items.len()].copy_from_slice(&items);
        state.pending.push_back((seq, slot));
    }

    /// Dump a sample whose item list does not decode (the stop race's
    /// spurious sample). The sample record itself is intact, so the failed
    /// decode still reports its user data and timestamps.
    fn emit_malformed(&self, state: &mut State, user_data: u64) {
        let Some(slot) = state.free_slots.pop() else {
            return;
        };

        let num_blocks: usize = state.counts.iter().map(|&n| n as usize).sum();
        let slot_size = Self::slot_size(num_blocks);
        let slot_base = slot * slot_size;

        let seq = state.seq_alloc;
        state.seq_alloc += 1;
        let ts = self.clock.stamp();

        let mut items = Vec::new();
        push_item(
            &mut items,
            item_type::METADATA_SAMPLE,
            &sample_record(ts, ts, seq, user_data, 0),
        );
        push_item(&mut items, item_type::METADATA_CLOCK, &clock_record(&[0, 0]));
        // No block records at all; the rest of the slot stays zeroed.
        state.mapping[slot_base + items.len()..slot_base + slot_size].fill(0);
        state.mapping[slot_base..slot_base + items.len()].copy_from_slice(&items);
        state.pending.push_back((seq, slot));
    }

    fn handle_command(&self, cmd: ControlCmd) -> io::Result<i32> {
        let mut state = self.state.borrow_mut();
        match cmd.cmd {
            CMD_START => {
                state.started = true;
                state.last_start_user_data = cmd.user_data;
            }
            CMD_STOP => {
                state.started = false;
                if state.drop_next_stop {
                    state.drop_next_stop = false;
                } else if state.race_next_stop {
                    state.race_next_stop = false;
                    let racing_user_data = state.last_start_user_data;
                    self.emit_malformed(&mut state, racing_user_data);
                    self.emit(&mut state, cmd.user_data);
                } else {
                    self.emit(&mut state, cmd.user_data);
                }
            }
            CMD_SAMPLE_SYNC => {
                if state.free_slots.is_empty() {
                    return Err(io::Error::from_raw_os_error(libc::EBUSY));
                }
                self.emit(&mut state, cmd.user_data);
            }
            CMD_DISCARD => {
                while let Some((_, slot)) = state.pending.pop_front() {
                    state.free_slots.push(slot);
                }
            }
            other => panic!("unexpected control command {other}"),
        }
        Ok(0)
    }

    fn handle_enum_info(&self, arg: &mut KinstrPrfcntEnumInfo) -> io::Result<i32> {
        let state = self.state.borrow();

        let mut items = Vec::new();
        for (type_idx, &count) in state.counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            push_item(
                &mut items,
                item_type::ENUM_BLOCK,
                &enum_block(type_idx as u8, 0, count as u16, NUM_VALUES),
            );
        }
        push_item(&mut items, item_type::ENUM_REQUEST, &enum_request(0, 1));
        push_item(&mut items, item_type::ENUM_REQUEST, &enum_request(1, 1));
        push_item(&mut items, item_type::ENUM_SAMPLE_INFO, &enum_sample_info(2));
        push_item(&mut items, item_type::ENUM_BLOCK, &enum_block(0, 0, 0, 0));

        let count = items.len() / TEST_STRIDE;
        arg.info_item_size = TEST_STRIDE as u32;
        arg.info_item_count = count as u32;

        if arg.info_list_ptr != 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    items.as_ptr(),
                    arg.info_list_ptr as *mut u8,
                    items.len(),
                );
            }
        }
        Ok(0)
    }
}

impl Syscall for KinstrMock {
    fn ioctl(&self, fd: RawFd, op: u64, arg: *mut libc::c_void) -> io::Result<i32> {
        match op {
            kbase::command::KINSTR_PRFCNT_ENUM_INFO => {
                assert_eq!(fd, DEVICE_FD);
                self.handle_enum_info(unsafe { &mut *(arg as *mut KinstrPrfcntEnumInfo) })
            }
            kbase::command::KINSTR_PRFCNT_SETUP => {
                assert_eq!(fd, DEVICE_FD);
                let setup_arg = unsafe { &mut *(arg as *mut KinstrPrfcntSetup) };
                setup_arg.out = KinstrPrfcntSetupOut {
                    prfcnt_metadata_item_size: TEST_STRIDE as u32,
                    prfcnt_mmap_size_bytes: self.state.borrow().mapping.len() as u32,
                };
                Ok(COUNTER_FD)
            }
            kinstr::command::ISSUE_COMMAND => {
                assert_eq!(fd, COUNTER_FD);
                self.handle_command(unsafe { *(arg as *const ControlCmd) })
            }
            kinstr::command::GET_SAMPLE => {
                assert_eq!(fd, COUNTER_FD);
                let mut state = self.state.borrow_mut();
                let Some((seq, slot)) = state.pending.pop_front() else {
                    return Err(io::Error::from_raw_os_error(libc::EAGAIN));
                };
                state.held.push((seq, slot));
                let num_blocks: usize = state.counts.iter().map(|&n| n as usize).sum();
                let access = unsafe { &mut *(arg as *mut SampleAccess) };
                access.sequence = seq;
                access.metadata_offset = (slot * Self::slot_size(num_blocks)) as u64;
                Ok(0)
            }
            kinstr::command::PUT_SAMPLE => {
                assert_eq!(fd, COUNTER_FD);
                let access = unsafe { *(arg as *const SampleAccess) };
                let mut state = self.state.borrow_mut();
                let at = state
                    .held
                    .iter()
                    .position(|&(seq, _)| seq == access.sequence)
                    .unwrap_or_else(|| panic!("put of unknown sample {}", access.sequence));
                let (_, slot) = state.held.swap_remove(at);
                state.free_slots.push(slot);
                Ok(0)
            }
            other => panic!("unexpected ioctl {other:#x}"),
        }
    }

    fn ioctl_val(&self, _fd: RawFd, op: u64, _arg: u64) -> io::Result<i32> {
        panic!("unexpected value ioctl {op:#x}");
    }

    fn poll(&self, fd: RawFd, _timeout_ms: i32) -> io::Result<bool> {
        assert_eq!(fd, COUNTER_FD);
        Ok(!self.state.borrow().pending.is_empty())
    }

    fn mmap(&self, fd: RawFd, len: usize) -> io::Result<NonNull<u8>> {
        assert_eq!(fd, COUNTER_FD);
        let mut state = self.state.borrow_mut();
        assert_eq!(len, state.mapping.len());
        Ok(NonNull::new(state.mapping.as_mut_ptr()).unwrap())
    }

    unsafe fn munmap(&self, _ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
        Ok(())
    }

    fn close(&self, _fd: RawFd) -> io::Result<()> {
        Ok(())
    }
}

const COUNTS: [u8; BlockType::COUNT] = [1, 0, 0, 3, 0, 0];
const SC_MASK: u64 = 0b1011;

fn instance() -> Instance {
    Instance {
        device_fd: DEVICE_FD,
        iface: CounterIface::KinstrPrfcnt,
        constants: GpuConstants {
            shader_core_mask: SC_MASK,
            num_l2_slices: 1,
            v4_layout: false,
        },
        block_state: BlockStateSupport {
            power: true,
            vm: false,
            protection: true,
        },
    }
}

fn configs() -> Vec<CounterConfig> {
    [BlockType::Fe, BlockType::Core]
        .into_iter()
        .map(|ty| CounterConfig {
            ty,
            set: PrfcntSet::Primary,
            enable: EnableMap::ALL,
        })
        .collect()
}

fn tunables() -> Tunables {
    Tunables {
        max_sessions: 4,
        ..Tunables::default()
    }
}

fn make_backend(
    mock: &KinstrMock,
    clock: &MockClock,
    period_ns: u64,
) -> WaBackend<KinstrMock, MockClock> {
    let args = setup::setup(&instance(), period_ns, &configs(), mock).unwrap();
    WaBackend::new(args, &tunables(), clock.clone()).unwrap()
}

fn get(backend: &mut impl Reader) -> (SampleMetadata, crate::hwcnt::SampleHandle) {
    let mut sm = SampleMetadata::default();
    let handle = backend.get_sample(&mut sm).unwrap();
    (sm, handle)
}

#[test]
fn setup_decodes_enumeration() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 0);

    let extents = backend.block_extents();
    assert_eq!(extents.num_blocks(), 4);
    assert_eq!(extents.num_blocks_of_type(BlockType::Fe), 1);
    assert_eq!(extents.num_blocks_of_type(BlockType::Core), 3);
    assert_eq!(extents.counters_per_block(), NUM_VALUES);
    assert!(backend.features().has_gpu_cycle);
    assert!(backend.features().has_power_states);
    let _ = backend.discard();
}

#[test]
fn manual_probe_finds_ring_capacity() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let backend = make_backend(&mock, &clock, 0);

    // The probe consumed its samples again; the ring is empty.
    assert_eq!(mock.occupied(), 0);
    drop(backend);
}

#[test]
fn manual_reserves_one_slot_for_stop() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 0);

    backend.start(0).unwrap();

    // Probed capacity 8: seven requests fit, the eighth would take the
    // slot reserved for the stop flush.
    for i in 0..7 {
        backend.request_sample(i).unwrap();
    }
    assert!(matches!(backend.request_sample(7), Err(Error::NotPermitted)));

    // Consuming one sample frees a slot and a request fits again.
    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 0);
    backend.put_sample(handle).unwrap();
    backend.request_sample(7).unwrap();

    // The stop flush itself always has room.
    backend.stop(99).unwrap();
}

#[test]
fn manual_sample_delivers_blocks_with_dense_core_indices() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 0);

    backend.start(0).unwrap();
    backend.request_sample(11).unwrap();

    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 11);
    assert_eq!(sm.sample_nr, 0);
    assert!(sm.timestamp_ns_begin < sm.timestamp_ns_end);
    assert!(sm.gpu_cycle >= 1000);

    let mut cursor = BlockHandle::default();
    let mut seen = Vec::new();
    while let Some(block) = backend.next(handle, &mut cursor) {
        assert_eq!(block.values.len(), VALUES_SIZE);
        assert!(block.values.iter().all(|&b| b != 0));
        assert!(block.state.on);
        seen.push((block.ty, block.index));
    }
    // Physical core slots 0, 1, 3 surface as dense indices 0, 1, 2.
    assert_eq!(
        seen,
        vec![
            (BlockType::Fe, 0),
            (BlockType::Core, 0),
            (BlockType::Core, 1),
            (BlockType::Core, 2),
        ]
    );

    // A second, independent iteration is allowed.
    let mut cursor2 = BlockHandle::default();
    assert!(backend.next(handle, &mut cursor2).is_some());

    backend.put_sample(handle).unwrap();
    backend.stop(0).unwrap();
}

#[test]
fn double_get_is_rejected() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 0);

    backend.start(0).unwrap();
    backend.request_sample(1).unwrap();
    backend.request_sample(2).unwrap();

    let (_, handle) = get(&mut backend);
    let mut sm = SampleMetadata::default();
    assert!(matches!(
        backend.get_sample(&mut sm),
        Err(Error::SampleInFlight)
    ));

    backend.put_sample(handle).unwrap();
    let (_, handle) = get(&mut backend);
    backend.put_sample(handle).unwrap();
}

#[test]
fn start_is_idempotent_while_active() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 0);

    backend.start(0).unwrap();
    backend.start(0).unwrap();
    backend.stop(0).unwrap();
    backend.stop(0).unwrap();
    // One stop sample, not two.
    assert_eq!(mock.occupied(), 1);
}

#[test]
fn request_sample_rejected_in_periodic_mode() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 1_000_000);

    assert!(matches!(
        backend.request_sample(0),
        Err(Error::InvalidMode)
    ));
}

#[test]
fn periodic_session_delivers_samples_and_stop() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 1_000_000);

    backend.start(7).unwrap();
    mock.tick();
    mock.tick();

    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 7);
    assert_eq!(sm.sample_nr, 0);
    backend.put_sample(handle).unwrap();

    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 7);
    assert_eq!(sm.sample_nr, 1);
    backend.put_sample(handle).unwrap();

    backend.stop(9).unwrap();

    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 9);
    assert_eq!(sm.sample_nr, 2);
    assert!(!sm.flags.error);
    backend.put_sample(handle).unwrap();

    assert_eq!(mock.occupied(), 0);
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn lost_stop_sample_is_synthesized() {
    init_logs();
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 1_000_000);

    // Session 0 with one periodic sample; its stop sample gets dropped.
    backend.start(7).unwrap();
    mock.tick();
    mock.drop_next_stop();
    backend.stop(9).unwrap();

    // Session 1 produces the sample that reveals the loss.
    backend.start(17).unwrap();
    mock.tick();

    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 7);
    backend.put_sample(handle).unwrap();

    // Loss detected: an empty error sample stands in for the stop sample,
    // carrying the stop-time user data and the session's time span.
    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 9);
    assert!(sm.flags.error);
    assert!(sm.timestamp_ns_begin < sm.timestamp_ns_end);

    // The synthetic sample has no blocks and is not forwarded to the
    // kernel on put.
    let mut cursor = BlockHandle::default();
    assert!(backend.next(handle, &mut cursor).is_none());
    let held_before = mock.occupied();
    backend.put_sample(handle).unwrap();
    assert_eq!(mock.occupied(), held_before);

    // The stashed session-1 sample arrives next.
    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 17);
    assert_eq!(sm.sample_nr, 2);
    backend.put_sample(handle).unwrap();

    backend.stop(19).unwrap();
    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 19);
    assert!(!sm.flags.error);
    backend.put_sample(handle).unwrap();
}

#[test]
fn keep_alive_bridges_lost_stop_with_empty_ring() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 1_000_000);

    backend.start(7).unwrap();
    mock.tick();
    mock.drop_next_stop();
    backend.stop(9).unwrap();

    // Consuming the last real sample leaves the ring empty with the stop
    // sample missing; the put triggers the keep-alive start/stop pair.
    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 7);
    backend.put_sample(handle).unwrap();
    assert_eq!(mock.occupied(), 1); // the keep-alive stop sample

    // Its stop sample confirms the loss and becomes the empty sample.
    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 9);
    assert!(sm.flags.error);
    backend.put_sample(handle).unwrap();

    assert_eq!(mock.occupied(), 0);
}

#[test]
fn stop_race_is_masked_with_synthetic_sample() {
    init_logs();
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 1_000_000);

    backend.start(7).unwrap();
    mock.tick();

    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 7);
    backend.put_sample(handle).unwrap();

    // The stop races the sampling timer: a garbage sample lands in the
    // stop window just before the real stop sample.
    mock.race_next_stop();
    backend.stop(9).unwrap();

    // The failure is absorbed, the raced stop sample is discarded, and a
    // synthetic empty sample is delivered instead; the raw decode error
    // never propagates.
    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 9);
    assert!(sm.flags.error);
    let mut cursor = BlockHandle::default();
    assert!(backend.next(handle, &mut cursor).is_none());
    backend.put_sample(handle).unwrap();

    assert_eq!(mock.occupied(), 0);
}

#[test]
fn sessions_fifo_is_bounded() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(16, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 1_000_000);

    // tunables().max_sessions == 4.
    for i in 0..4 {
        backend.start(i).unwrap();
        backend.stop(i + 100).unwrap();
    }
    assert!(matches!(backend.start(4), Err(Error::NotPermitted)));

    // Draining the oldest session frees a slot.
    let (sm, handle) = get(&mut backend);
    assert_eq!(sm.user_data, 100);
    backend.put_sample(handle).unwrap();
    backend.start(4).unwrap();
    backend.stop(104).unwrap();

    // The remaining stop samples arrive strictly oldest first.
    for expected in [101, 102, 103, 104] {
        let (sm, handle) = get(&mut backend);
        assert_eq!(sm.user_data, expected);
        backend.put_sample(handle).unwrap();
    }
}

#[test]
fn discard_drains_stale_samples() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 0);

    backend.start(0).unwrap();
    backend.request_sample(1).unwrap();
    backend.request_sample(2).unwrap();
    backend.stop(3).unwrap();

    backend.discard().unwrap();
    assert_eq!(mock.occupied(), 0);

    // Nothing left to read.
    assert!(!mock.poll(COUNTER_FD, 0).unwrap());
}

#[test]
fn manual_sampler_front_end() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut sampler = crate::sampler::Manual::with_parts(
        &instance(),
        &configs(),
        &tunables(),
        mock.clone(),
        clock.clone(),
    )
    .unwrap();

    sampler.accumulation_start().unwrap();
    sampler.request_sample(42).unwrap();

    let sample = Sample::new(sampler.reader()).unwrap();
    assert_eq!(sample.metadata().user_data, 42);
    assert_eq!(sample.blocks().count(), 4);
    drop(sample);

    sampler.accumulation_stop(43).unwrap();
    let sample = Sample::new(sampler.reader()).unwrap();
    assert_eq!(sample.metadata().user_data, 43);
    drop(sample);

    assert_eq!(mock.occupied(), 0);
}

#[test]
fn sample_facade_over_periodic_backend() {
    let clock = MockClock::default();
    let mock = KinstrMock::new(8, COUNTS, SC_MASK, &clock);
    let mut backend = make_backend(&mock, &clock, 1_000_000);

    backend.start(21).unwrap();
    mock.tick();

    {
        let sample = Sample::new(&mut backend).unwrap();
        assert_eq!(sample.metadata().user_data, 21);
        assert_eq!(sample.blocks().count(), 4);
    }
    // Dropping the facade returned the slot.
    assert_eq!(mock.occupied(), 0);

    backend.stop(22).unwrap();
    let sample = Sample::new(&mut backend).unwrap();
    assert_eq!(sample.metadata().user_data, 22);
    sample.release().unwrap();
}
