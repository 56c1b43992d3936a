//! The shared protocol block and the two per-party views onto it
//!
//! The block is two single-writer/single-reader mailboxes. The manager owns
//! every field of [`ManagerToExecutor`], the executor owns every field of
//! [`ExecutorToManager`]; that split is enforced at the type level by
//! [`ManagerSide`] and [`ExecutorSide`], which expose write access only to
//! the half their party owns.
//!
//! All accesses are volatile (the peer mutates the block behind the
//! compiler's back), and every visible update (`cmd_seq`, `cmd_ack`,
//! `state`, ring cursors) is preceded by a store-ordering barrier so the
//! data it announces is observable first. The two cores may not share a
//! coherent cache view at cold boot; getting freshly written lines to the
//! point of coherency is the job of the machine layer, not of this module.

use core::mem::size_of;
use core::ptr::{addr_of, addr_of_mut, read_volatile, write_volatile};
use core::sync::atomic::{fence, Ordering};

use crate::layout::MONITOR_IPC_SIZE;
use crate::regs::{Aarch64FpRegs, Aarch64Regs};
use crate::state::{Command, DomainState, ReportedState, Response};

use static_assertions::{const_assert, const_assert_eq};

/// Capacity of the executor's output ring. One slot is sacrificial: the
/// ring holds at most `STDOUT_BUFFER_SIZE - 1` bytes.
pub const STDOUT_BUFFER_SIZE: usize = 1024;

/// Length of the truncated fault description.
pub const FAULT_DESC_LEN: usize = 32;

/// Fields written only by the manager, read only by the executor.
#[repr(C)]
pub struct ManagerToExecutor {
    pub cmd: u32,
    pub cmd_seq: u32,
    /// Generic Timer frequency to seed CNTFRQ_EL0; there is no firmware on
    /// the executor side to have set it.
    pub cntfrq: u32,
    /// Consumer cursor into the executor's output ring.
    pub stdout_rdpos: u32,
    pub payload_entry_address: u64,
    pub payload_size: u64,
    /// Opaque value handed to the payload at startup.
    pub payload_argument: u64,
    pub payload_crc: u32,
    pub _res0: u32,
}

/// Fields written only by the executor, read only by the manager.
#[repr(C)]
pub struct ExecutorToManager {
    /// Raw `DomainState` ordinal.
    pub state: u32,
    /// Mirrors `cmd_seq` of the last fully processed command.
    pub cmd_ack: u32,
    /// Raw `Response` ordinal for the last `StartPayload`.
    pub cmd_resp: u32,
    pub fault_el: u32,
    pub fault_pc: u64,
    pub fault_desc: [u8; FAULT_DESC_LEN],
    pub regs: Aarch64Regs,
    pub _pad0: [u8; 8],
    pub fpregs: Aarch64FpRegs,
    pub stdout_wrpos: u32,
    pub _res0: u32,
    pub stdout_buf: [u8; STDOUT_BUFFER_SIZE],
    pub _pad1: [u8; 8],
}

/// The protocol block, as it lives at the base of the monitor IPC region.
/// Zero-initialized by the manager at monitor boot time.
#[repr(C)]
pub struct IpcBlock {
    pub manager_to_executor: ManagerToExecutor,
    pub executor_to_manager: ExecutorToManager,
}

// Oversizing the block is a build-time error, not a run-time one.
const_assert!(size_of::<IpcBlock>() <= MONITOR_IPC_SIZE);
const_assert_eq!(size_of::<ManagerToExecutor>(), 48);
const_assert_eq!(size_of::<ExecutorToManager>(), 1904);

impl IpcBlock {
    pub fn zeroed() -> Self {
        // All fields are plain data; the all-zeroes pattern is valid.
        unsafe { core::mem::zeroed() }
    }
}

/// Store-ordering barrier: everything stored before this is observable by
/// the other core no later than anything stored after it. On AArch64 this
/// lowers to `dmb ish`, which covers the `dmb ishst` the protocol needs.
#[inline]
pub fn store_barrier() {
    fence(Ordering::Release);
}

/// Arguments of a `StartPayload` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPayloadArgs {
    pub entry_address: u64,
    pub size: u64,
    pub crc: u32,
    pub argument: u64,
}

macro_rules! volatile_read {
    ($block:expr, $($field:tt).+) => {
        unsafe { read_volatile(addr_of!((*$block).$($field).+)) }
    };
}

macro_rules! volatile_write {
    ($block:expr, $($field:tt).+, $value:expr) => {
        unsafe { write_volatile(addr_of_mut!((*$block).$($field).+), $value) }
    };
}

/// The manager's view: writes the manager half, reads the executor half.
#[derive(Clone, Copy)]
pub struct ManagerSide {
    block: *mut IpcBlock,
}

// The view is handed to the single thread that drives a domain; the block
// itself is shared memory and all accesses are volatile.
unsafe impl Send for ManagerSide {}

impl ManagerSide {
    /// # Safety
    /// `block` must point to a mapped, `IpcBlock`-sized region, and the
    /// caller must be the only party writing the manager half.
    pub unsafe fn new(block: *mut IpcBlock) -> Self {
        Self { block }
    }

    /// Zero the whole block. Only legal before the executor core is
    /// released from reset.
    pub fn zero_block(&self) {
        unsafe {
            core::ptr::write_bytes(self.block.cast::<u8>(), 0, size_of::<IpcBlock>());
        }
        store_barrier();
    }

    pub fn set_cntfrq(&self, cntfrq: u32) {
        volatile_write!(self.block, manager_to_executor.cntfrq, cntfrq);
    }

    pub fn cmd_seq(&self) -> u32 {
        volatile_read!(self.block, manager_to_executor.cmd_seq)
    }

    pub fn cmd_ack(&self) -> u32 {
        volatile_read!(self.block, executor_to_manager.cmd_ack)
    }

    /// True when the previously issued command has been fully processed.
    /// The manager must not advance `cmd_seq` until this holds: the block
    /// is a half-duplex RPC, not a queue.
    pub fn command_acknowledged(&self) -> bool {
        self.cmd_ack() == self.cmd_seq()
    }

    pub fn send_noop(&self) {
        volatile_write!(self.block, manager_to_executor.cmd, Command::Noop as u32);
        store_barrier();
        let seq = self.cmd_seq().wrapping_add(1);
        volatile_write!(self.block, manager_to_executor.cmd_seq, seq);
    }

    pub fn send_start_payload(&self, args: StartPayloadArgs) {
        volatile_write!(
            self.block,
            manager_to_executor.payload_entry_address,
            args.entry_address
        );
        volatile_write!(self.block, manager_to_executor.payload_size, args.size);
        volatile_write!(self.block, manager_to_executor.payload_crc, args.crc);
        volatile_write!(
            self.block,
            manager_to_executor.payload_argument,
            args.argument
        );
        volatile_write!(
            self.block,
            manager_to_executor.cmd,
            Command::StartPayload as u32
        );
        store_barrier();
        let seq = self.cmd_seq().wrapping_add(1);
        volatile_write!(self.block, manager_to_executor.cmd_seq, seq);
    }

    /// Rewrite the command word to `Noop` without advancing the sequence
    /// number. Used before a monitor restart: a pending command the
    /// restarted monitor re-observes is then harmless.
    pub fn clear_pending_command(&self) {
        volatile_write!(self.block, manager_to_executor.cmd, Command::Noop as u32);
        store_barrier();
    }

    pub fn reported_state(&self) -> ReportedState {
        DomainState::from_raw(volatile_read!(self.block, executor_to_manager.state))
    }

    pub fn cmd_resp(&self) -> Option<Response> {
        Response::from_raw(self.cmd_resp_raw())
    }

    pub fn cmd_resp_raw(&self) -> u32 {
        volatile_read!(self.block, executor_to_manager.cmd_resp)
    }

    pub fn fault_el(&self) -> u32 {
        volatile_read!(self.block, executor_to_manager.fault_el)
    }

    pub fn fault_pc(&self) -> u64 {
        volatile_read!(self.block, executor_to_manager.fault_pc)
    }

    pub fn fault_desc(&self) -> [u8; FAULT_DESC_LEN] {
        volatile_read!(self.block, executor_to_manager.fault_desc)
    }

    pub fn regs(&self) -> Aarch64Regs {
        volatile_read!(self.block, executor_to_manager.regs)
    }

    pub fn fpregs(&self) -> Aarch64FpRegs {
        volatile_read!(self.block, executor_to_manager.fpregs)
    }

    pub fn stdout_wrpos(&self) -> u32 {
        volatile_read!(self.block, executor_to_manager.stdout_wrpos)
    }

    pub fn stdout_rdpos(&self) -> u32 {
        volatile_read!(self.block, manager_to_executor.stdout_rdpos)
    }

    /// Discard any stale output by advancing the read cursor to the current
    /// write position.
    pub fn discard_stale_stdout(&self) {
        let wrpos = self.stdout_wrpos();
        volatile_write!(self.block, manager_to_executor.stdout_rdpos, wrpos);
        store_barrier();
    }

    /// Non-blocking single-byte consumer of the output ring.
    pub fn pop_stdout(&self) -> Option<u8> {
        let mut rdpos = self.stdout_rdpos();

        if rdpos as usize >= STDOUT_BUFFER_SIZE {
            // Protocol desync guard: clamp rather than index out of bounds.
            log::warn!("unexpected stdout rdpos {rdpos:#x}, resetting to 0");
            volatile_write!(self.block, manager_to_executor.stdout_rdpos, 0);
            rdpos = 0;
        }

        if rdpos == self.stdout_wrpos() {
            return None;
        }

        let byte =
            unsafe { read_volatile(addr_of!((*self.block).executor_to_manager.stdout_buf[0]).add(rdpos as usize)) };
        let next = (rdpos + 1) % STDOUT_BUFFER_SIZE as u32;
        volatile_write!(self.block, manager_to_executor.stdout_rdpos, next);
        Some(byte)
    }
}

/// The executor's view: writes the executor half, reads the manager half.
#[derive(Clone, Copy)]
pub struct ExecutorSide {
    block: *mut IpcBlock,
}

unsafe impl Send for ExecutorSide {}

impl ExecutorSide {
    /// # Safety
    /// `block` must point to a mapped, `IpcBlock`-sized region, and the
    /// caller must be the only party writing the executor half.
    pub unsafe fn new(block: *mut IpcBlock) -> Self {
        Self { block }
    }

    pub fn cmd_raw(&self) -> u32 {
        volatile_read!(self.block, manager_to_executor.cmd)
    }

    pub fn cmd_seq(&self) -> u32 {
        volatile_read!(self.block, manager_to_executor.cmd_seq)
    }

    pub fn cmd_ack(&self) -> u32 {
        volatile_read!(self.block, executor_to_manager.cmd_ack)
    }

    pub fn cntfrq(&self) -> u32 {
        volatile_read!(self.block, manager_to_executor.cntfrq)
    }

    pub fn start_payload_args(&self) -> StartPayloadArgs {
        StartPayloadArgs {
            entry_address: volatile_read!(self.block, manager_to_executor.payload_entry_address),
            size: volatile_read!(self.block, manager_to_executor.payload_size),
            crc: volatile_read!(self.block, manager_to_executor.payload_crc),
            argument: volatile_read!(self.block, manager_to_executor.payload_argument),
        }
    }

    pub fn payload_argument(&self) -> u64 {
        volatile_read!(self.block, manager_to_executor.payload_argument)
    }

    pub fn set_state(&self, state: DomainState) {
        // Everything recorded before the state transition must be
        // observable no later than the transition itself.
        store_barrier();
        volatile_write!(self.block, executor_to_manager.state, state as u32);
        store_barrier();
    }

    pub fn set_cmd_resp(&self, resp: Response) {
        volatile_write!(self.block, executor_to_manager.cmd_resp, resp as u32);
    }

    /// Acknowledge the command currently being processed. The response code
    /// must already be recorded; the barrier makes it visible first.
    pub fn ack_command(&self) {
        store_barrier();
        let ack = self.cmd_ack().wrapping_add(1);
        volatile_write!(self.block, executor_to_manager.cmd_ack, ack);
    }

    pub fn record_fault(&self, el: u32, pc: u64, desc: &str) {
        let mut buf = [0u8; FAULT_DESC_LEN];
        let len = desc.len().min(FAULT_DESC_LEN);
        buf[..len].copy_from_slice(&desc.as_bytes()[..len]);

        volatile_write!(self.block, executor_to_manager.fault_el, el);
        volatile_write!(self.block, executor_to_manager.fault_pc, pc);
        volatile_write!(self.block, executor_to_manager.fault_desc, buf);
    }

    pub fn store_regs(&self, regs: &Aarch64Regs) {
        volatile_write!(self.block, executor_to_manager.regs, *regs);
    }

    pub fn store_fpregs(&self, fpregs: &Aarch64FpRegs) {
        volatile_write!(self.block, executor_to_manager.fpregs, *fpregs);
    }

    pub fn stdout_wrpos(&self) -> u32 {
        volatile_read!(self.block, executor_to_manager.stdout_wrpos)
    }

    pub fn stdout_rdpos(&self) -> u32 {
        volatile_read!(self.block, manager_to_executor.stdout_rdpos)
    }

    /// Producer side of the output ring.
    ///
    /// Always claims the full length: a clogged ring must not make the
    /// payload's stdout go into a permanent error state, so overflowing
    /// bytes are silently dropped (on a hosted OS the write would block
    /// instead; blocking is not an option here).
    pub fn write_stdout(&self, data: &[u8]) -> usize {
        let mut wrpos = self.stdout_wrpos();

        if wrpos as usize >= STDOUT_BUFFER_SIZE {
            // Be very conservative: never index out of bounds, whatever the
            // manager half claims.
            volatile_write!(self.block, executor_to_manager.stdout_wrpos, 0);
            store_barrier();
            wrpos = 0;
            self.push_bytes(&mut wrpos, b"unexpected stdout wrpos, reset to 0\n");
        }

        self.push_bytes(&mut wrpos, data);
        data.len()
    }

    fn push_bytes(&self, wrpos: &mut u32, data: &[u8]) {
        let rdpos = self.stdout_rdpos();
        let mut pos = *wrpos;

        for &byte in data {
            let next = (pos + 1) % STDOUT_BUFFER_SIZE as u32;
            if next == rdpos {
                // Full: the would-be next write position has caught up with
                // the consumer. Never filled by equality of raw positions.
                break;
            }
            unsafe {
                write_volatile(
                    addr_of_mut!((*self.block).executor_to_manager.stdout_buf[0]).add(pos as usize),
                    byte,
                );
            }
            pos = next;
        }

        // Bytes first, cursor after.
        store_barrier();
        volatile_write!(self.block, executor_to_manager.stdout_wrpos, pos);
        *wrpos = pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::vec::Vec;

    fn block_pair() -> (Box<IpcBlock>, ManagerSide, ExecutorSide) {
        let mut block = Box::new(IpcBlock::zeroed());
        let ptr: *mut IpcBlock = &mut *block;
        let manager = unsafe { ManagerSide::new(ptr) };
        let executor = unsafe { ExecutorSide::new(ptr) };
        (block, manager, executor)
    }

    #[test]
    fn command_handshake_is_half_duplex() {
        let (_block, manager, executor) = block_pair();

        assert!(manager.command_acknowledged());

        manager.send_noop();
        assert!(!manager.command_acknowledged());
        assert_eq!(executor.cmd_seq(), 1);
        assert_eq!(executor.cmd_raw(), Command::Noop as u32);

        executor.ack_command();
        assert!(manager.command_acknowledged());
    }

    #[test]
    fn start_payload_args_cross_the_block_intact() {
        let (_block, manager, executor) = block_pair();

        let args = StartPayloadArgs {
            entry_address: 0x7802_0000,
            size: 0x1234,
            crc: 0xCAFE_BABE,
            argument: 42,
        };
        manager.send_start_payload(args);

        assert_eq!(executor.start_payload_args(), args);
        assert_eq!(executor.cmd_raw(), Command::StartPayload as u32);
    }

    #[test]
    fn stdout_ring_round_trips_in_order() {
        let (_block, manager, executor) = block_pair();

        // Any N up to capacity minus the sacrificial slot.
        for n in [0usize, 1, 7, STDOUT_BUFFER_SIZE - 1] {
            let data: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
            assert_eq!(executor.write_stdout(&data), n);

            let mut out = Vec::new();
            while let Some(byte) = manager.pop_stdout() {
                out.push(byte);
            }
            assert_eq!(out, data);
        }
    }

    #[test]
    fn stdout_ring_wraps_around() {
        let (_block, manager, executor) = block_pair();

        // Push the cursors most of the way around, then cross the seam.
        let filler = vec![0u8; STDOUT_BUFFER_SIZE - 10];
        executor.write_stdout(&filler);
        while manager.pop_stdout().is_some() {}

        let data = b"crossing the wrap boundary";
        executor.write_stdout(data);

        let mut out = Vec::new();
        while let Some(byte) = manager.pop_stdout() {
            out.push(byte);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn full_ring_drops_but_claims_everything() {
        let (_block, manager, executor) = block_pair();

        let data = vec![7u8; STDOUT_BUFFER_SIZE + 100];
        // The producer lies about the count by design.
        assert_eq!(executor.write_stdout(&data), data.len());

        let mut received = 0usize;
        while manager.pop_stdout().is_some() {
            received += 1;
        }
        assert_eq!(received, STDOUT_BUFFER_SIZE - 1);
    }

    #[test]
    fn out_of_range_read_cursor_is_clamped() {
        let mut block = Box::new(IpcBlock::zeroed());
        let ptr: *mut IpcBlock = &mut *block;
        let manager = unsafe { ManagerSide::new(ptr) };
        let executor = unsafe { ExecutorSide::new(ptr) };

        executor.write_stdout(b"x");
        // Desync the cursor the way a misbehaving peer would: through the
        // shared mapping, not through the owning box.
        unsafe {
            core::ptr::write_volatile(
                core::ptr::addr_of_mut!((*ptr).manager_to_executor.stdout_rdpos),
                STDOUT_BUFFER_SIZE as u32 + 17,
            );
        }

        // Clamp resets to 0, after which the pending byte is readable.
        assert_eq!(manager.pop_stdout(), Some(b'x'));
    }

    #[test]
    fn discard_stale_stdout_skips_unread_output() {
        let (_block, manager, executor) = block_pair();

        executor.write_stdout(b"stale");
        manager.discard_stale_stdout();
        assert_eq!(manager.pop_stdout(), None);

        executor.write_stdout(b"f");
        assert_eq!(manager.pop_stdout(), Some(b'f'));
    }

    #[test]
    fn fault_record_is_truncated_and_readable() {
        let (_block, manager, executor) = block_pair();

        executor.record_fault(3, 0x7802_1234, "a very long fault description that exceeds the field");
        executor.set_state(DomainState::CrashedPayload);

        assert_eq!(manager.fault_el(), 3);
        assert_eq!(manager.fault_pc(), 0x7802_1234);
        assert_eq!(
            manager.reported_state(),
            ReportedState::Known(DomainState::CrashedPayload)
        );
        let desc = manager.fault_desc();
        assert_eq!(&desc[..], &"a very long fault description that exceeds the field".as_bytes()[..FAULT_DESC_LEN]);
    }

    #[test]
    fn zero_block_resets_both_halves() {
        let (_block, manager, executor) = block_pair();

        manager.send_noop();
        executor.ack_command();
        executor.write_stdout(b"leftover");
        executor.set_state(DomainState::MonitorReady);

        manager.zero_block();

        assert_eq!(manager.cmd_seq(), 0);
        assert_eq!(manager.cmd_ack(), 0);
        assert_eq!(
            manager.reported_state(),
            ReportedState::Known(DomainState::InReset)
        );
        assert_eq!(manager.pop_stdout(), None);
    }
}
