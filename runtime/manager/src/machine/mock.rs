//! Simulated machine (feature `mock`)
//!
//! One domain's worth of memory in an ordinary buffer, with the real
//! monitor dispatch engine running on a thread as the simulated executor
//! core. Payload behavior is scripted in-band: the first body byte of a
//! mock payload image selects what the "payload" does once entered, so
//! tests drive the full manager/executor protocol without any hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use domctl_monitor::mock::MockPlatform;
use domctl_monitor::smc::handle_smc;
use domctl_monitor::{crash, CrashingEntity, Monitor, MonitorPlatform, Step};

use domctl_protocol::smc::{ABI_VERSION, NOTIFY_PAYLOAD_STARTED, WRITE_STDOUT};
use domctl_protocol::{
    Aarch64FpRegs, Aarch64Regs, DomainIndex, ExecutorSide, IpcBlock, ManagerSide, MemoryLayout,
    PayloadImageHeader,
};

use crate::{DomainError, Result};

/// Scripted behavior of a mock payload, encoded as its first body byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadScript {
    /// Report started, then idle.
    Park = 0,
    /// Report started, write the rest of the body to stdout, then idle.
    PrintBody = 1,
    /// Fault before ever reporting started.
    CrashEarly = 2,
    /// Report started, then fault.
    CrashAfterStart = 3,
}

/// Build a loadable mock payload image: valid header, scripted body.
pub fn mock_payload_image(script: PayloadScript, body: &[u8]) -> Vec<u8> {
    let header = PayloadImageHeader::new(
        *b"\x08\x00\x00\x14\0\0\0\0",
        ABI_VERSION.major,
        ABI_VERSION.minor,
        0,
        0,
    );
    let mut image = header.to_bytes().to_vec();
    image.push(script as u8);
    image.extend_from_slice(body);
    image
}

struct Shared {
    doorbell: AtomicBool,
    stop: AtomicBool,
    in_reset: AtomicBool,
}

#[derive(Clone, Copy)]
struct SendPtr(*mut u8);
unsafe impl Send for SendPtr {}

/// The simulated machine. Supports a single domain.
pub struct MockMachine {
    mem: Box<[u8]>,
    index: DomainIndex,
    layout: MemoryLayout,
    shared: Arc<Shared>,
    executor: Option<JoinHandle<()>>,
    timer_frequency: u32,
}

impl MockMachine {
    pub fn new(index: DomainIndex) -> Self {
        let layout = MemoryLayout::for_domain(index);
        let total = (layout.payload.end() - layout.monitor_code.base) as usize;

        Self {
            mem: vec![0u8; total].into_boxed_slice(),
            index,
            layout,
            shared: Arc::new(Shared {
                doorbell: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                in_reset: AtomicBool::new(true),
            }),
            executor: None,
            timer_frequency: 100_000_000,
        }
    }

    pub fn layout(&self) -> MemoryLayout {
        self.layout
    }

    fn offset_of(&self, addr: u64, size: usize) -> Result<usize> {
        let base = self.layout.monitor_code.base;
        let end = self.layout.payload.end();
        if addr < base || addr + size as u64 > end {
            return Err(DomainError::BadPhysRange { addr, size });
        }
        Ok((addr - base) as usize)
    }

    fn check_domain(&self, index: DomainIndex) -> Result<()> {
        if index == self.index {
            Ok(())
        } else {
            Err(DomainError::DomainUnavailable)
        }
    }
}

impl super::Machine for MockMachine {
    fn ipc_block(&self, index: DomainIndex) -> Result<ManagerSide> {
        self.check_domain(index)?;
        let offset = self.offset_of(self.layout.monitor_ipc.base, self.layout.monitor_ipc.size)?;
        let block = self.mem.as_ptr().wrapping_add(offset) as *mut IpcBlock;
        Ok(unsafe { ManagerSide::new(block) })
    }

    fn write_phys(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let offset = self.offset_of(addr, data.len())?;
        // The executor thread only polls the protocol block while the
        // manager writes images, so a plain copy is fine here.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.mem.as_mut_ptr().add(offset),
                data.len(),
            );
        }
        Ok(())
    }

    fn read_phys(&self, addr: u64, out: &mut [u8]) -> Result<()> {
        let offset = self.offset_of(addr, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.mem.as_ptr().add(offset),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        Ok(())
    }

    fn core_in_reset(&self, index: DomainIndex) -> Result<bool> {
        self.check_domain(index)?;
        Ok(self.shared.in_reset.load(Ordering::Acquire))
    }

    fn release_core(&mut self, index: DomainIndex, _entry: u64) -> Result<()> {
        self.check_domain(index)?;
        if self.executor.is_some() {
            return Ok(());
        }

        let mem = SendPtr(self.mem.as_ptr() as *mut u8);
        let layout = self.layout;
        let shared = Arc::clone(&self.shared);

        self.shared.in_reset.store(false, Ordering::Release);
        self.executor = Some(thread::spawn(move || executor_thread(mem, layout, shared)));
        Ok(())
    }

    fn ring_restart_doorbell(&mut self, index: DomainIndex) -> Result<()> {
        self.check_domain(index)?;
        self.shared.doorbell.store(true, Ordering::Release);
        Ok(())
    }

    fn timer_frequency(&self) -> u32 {
        self.timer_frequency
    }
}

impl Drop for MockMachine {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.executor.take() {
            let _ = handle.join();
        }
    }
}

const POLL_NAP: Duration = Duration::from_micros(200);

/// The simulated executor core: the real dispatch engine in a loop, plus a
/// scripted stand-in for whatever payload it enters.
fn executor_thread(mem: SendPtr, layout: MemoryLayout, shared: Arc<Shared>) {
    let block_offset = (layout.monitor_ipc.base - layout.monitor_code.base) as usize;
    let block = unsafe { mem.0.add(block_offset) } as *mut IpcBlock;
    let executor = unsafe { ExecutorSide::new(block) };

    'restart: loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
        shared.doorbell.store(false, Ordering::Release);

        let platform = unsafe { MockPlatform::new(mem.0, layout) };
        let mut monitor = Monitor::new(executor, platform, layout);
        monitor.start();

        loop {
            if shared.stop.load(Ordering::Acquire) {
                return;
            }
            if shared.doorbell.swap(false, Ordering::AcqRel) {
                continue 'restart;
            }

            match monitor.poll_once() {
                Step::Idle => thread::sleep(POLL_NAP),
                Step::EnteredPayload { entry, .. } => {
                    run_scripted_payload(&executor, monitor.platform_mut(), entry, layout);
                    if park_until_doorbell(&shared) {
                        continue 'restart;
                    }
                    return;
                }
                Step::EnteredIdleStub => {
                    if park_until_doorbell(&shared) {
                        continue 'restart;
                    }
                    return;
                }
                _ => {}
            }
        }
    }
}

/// Returns true on doorbell, false on stop.
fn park_until_doorbell(shared: &Shared) -> bool {
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return false;
        }
        if shared.doorbell.swap(false, Ordering::AcqRel) {
            return true;
        }
        thread::sleep(POLL_NAP);
    }
}

fn run_scripted_payload(
    executor: &ExecutorSide,
    platform: &mut MockPlatform,
    entry: u64,
    layout: MemoryLayout,
) {
    let mut opcode = [0u8; 1];
    let body = entry + domctl_protocol::PAYLOAD_IMAGE_HEADER_SIZE as u64;
    if platform.copy_from_payload(body, &mut opcode) != 1 {
        return;
    }

    let crash_regs = || {
        let mut regs = Aarch64Regs::zeroed();
        for (i, reg) in regs.regs.iter_mut().enumerate() {
            *reg = i as u64;
        }
        regs.pc = entry + 0x40;
        regs.sp = layout.payload.end();
        regs
    };

    match opcode[0] {
        x if x == PayloadScript::Park as u8 => {
            handle_smc(executor, platform, NOTIFY_PAYLOAD_STARTED, [0; 3]);
        }
        x if x == PayloadScript::PrintBody as u8 => {
            handle_smc(executor, platform, NOTIFY_PAYLOAD_STARTED, [0; 3]);
            // Body after the opcode byte is the text to print.
            let args = executor.start_payload_args();
            let header = domctl_protocol::PAYLOAD_IMAGE_HEADER_SIZE as u64;
            let text_addr = body + 1;
            let text_len = args.size - header - 1;
            handle_smc(executor, platform, WRITE_STDOUT, [text_addr, text_len, 0]);
        }
        x if x == PayloadScript::CrashEarly as u8 => {
            crash::report_crash(
                executor,
                CrashingEntity::Payload,
                "early fault",
                1,
                entry + 0x40,
                &crash_regs(),
                &Aarch64FpRegs::zeroed(),
            );
        }
        x if x == PayloadScript::CrashAfterStart as u8 => {
            handle_smc(executor, platform, NOTIFY_PAYLOAD_STARTED, [0; 3]);
            crash::report_crash(
                executor,
                CrashingEntity::Payload,
                "late fault",
                1,
                entry + 0x40,
                &crash_regs(),
                &Aarch64FpRegs::zeroed(),
            );
        }
        _ => {}
    }
}
