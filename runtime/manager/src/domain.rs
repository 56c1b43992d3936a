//! The per-core domain state machine
//!
//! One [`Domain`] owns one supervised core for the life of the process.
//! Every lifecycle operation is here: installing the monitor, loading and
//! starting payloads, terminating them via the restart doorbell, streaming
//! output and extracting forensics. The hardware is only ever touched
//! through the [`Machine`] seam and the typed protocol block view.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use bitflags::bitflags;

use domctl_protocol::{
    crc32, DomainIndex, DomainState, ManagerSide, MemoryLayout, ReportedState, Response,
    StartPayloadArgs, DUMMY_PAYLOAD_ENTRY, MONITOR_CODE_COOKIE,
};

use crate::coredump;
use crate::machine::Machine;
use crate::{DomainError, Result};

/// How long to keep polling the block, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    /// Monitor boot and restart: the monitor announces readiness within a
    /// few milliseconds, so half a second of grace is generous.
    pub const STARTUP: PollPolicy = PollPolicy {
        timeout: Duration::from_millis(500),
        interval: Duration::from_millis(10),
    };

    /// Payload start: validation includes a CRC pass over the whole image,
    /// so the budget is wider.
    pub const PAYLOAD_START: PollPolicy = PollPolicy {
        timeout: Duration::from_millis(1000),
        interval: Duration::from_millis(10),
    };
}

/// Coarse classification of a domain, decided once at open time and
/// updated by `startup`. Only `MonitorInstalled` makes the block's
/// reported state authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainGeneralState {
    /// Install cookie present; the block is live.
    MonitorInstalled,
    /// Core held in reset, nothing installed yet.
    InReset,
    /// Core runs code we did not put there. Hands off.
    Unavailable,
}

bitflags! {
    /// What `dump_debug_info` should include.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugDumpFlags: u32 {
        const STATE = 1 << 0;
        const FAULT = 1 << 1;
        const REGS = 1 << 2;
        const RING = 1 << 3;
        const ALL = Self::STATE.bits() | Self::FAULT.bits() | Self::REGS.bits() | Self::RING.bits();
    }
}

/// Forensic summary of a crashed domain.
#[derive(Debug, Clone)]
pub struct CrashInfo {
    pub state: DomainState,
    /// Exception level the fault was taken from.
    pub el: u32,
    pub pc: u64,
    pub desc: String,
}

pub struct Domain<M: Machine> {
    machine: M,
    index: DomainIndex,
    layout: MemoryLayout,
    block: ManagerSide,
    general: DomainGeneralState,
}

impl<M: Machine> Domain<M> {
    /// Take ownership of one core and classify it.
    ///
    /// The install cookie in the last word of the monitor code region is
    /// the "a monitor lives here" heuristic; a false positive from leftover
    /// memory contents is possible and accepted, a power cycle clears it.
    pub fn open(machine: M, index: DomainIndex) -> Result<Self> {
        let layout = MemoryLayout::for_domain(index);
        let block = machine.ipc_block(index)?;

        let cookie = machine.read_phys_u32(layout.cookie_address())?;
        let general = if cookie == MONITOR_CODE_COOKIE {
            DomainGeneralState::MonitorInstalled
        } else if machine.core_in_reset(index)? {
            DomainGeneralState::InReset
        } else {
            DomainGeneralState::Unavailable
        };

        log::debug!("domain {index}: opened as {general:?}");
        Ok(Self {
            machine,
            index,
            layout,
            block,
            general,
        })
    }

    pub fn index(&self) -> DomainIndex {
        self.index
    }

    pub fn general_state(&self) -> DomainGeneralState {
        self.general
    }

    /// Install the monitor and bring the core up. Idempotent: a domain
    /// that already has a monitor is left untouched.
    pub fn startup(&mut self, monitor_image: &[u8]) -> Result<()> {
        match self.general {
            DomainGeneralState::MonitorInstalled => return Ok(()),
            DomainGeneralState::Unavailable => return Err(DomainError::DomainUnavailable),
            DomainGeneralState::InReset => {}
        }

        // Keep clear of the cookie word at the end of the region.
        let limit = self.layout.monitor_code.size - 4;
        if monitor_image.len() > limit {
            return Err(DomainError::ImageTooLarge {
                size: monitor_image.len(),
                limit,
            });
        }

        self.block.zero_block();
        self.block.set_cntfrq(self.machine.timer_frequency());

        self.machine
            .write_phys(self.layout.monitor_code.base, monitor_image)?;
        self.machine
            .write_phys_u32(self.layout.cookie_address(), MONITOR_CODE_COOKIE)?;

        log::info!("domain {}: releasing core from reset", self.index);
        self.machine
            .release_core(self.index, self.layout.monitor_code.base)?;

        self.await_state(DomainState::MonitorReady, PollPolicy::STARTUP, "monitor startup")?;
        self.general = DomainGeneralState::MonitorInstalled;
        Ok(())
    }

    /// Lifecycle state as the API reports it. Never fails: a desynced
    /// block degrades to `InvalidState` instead.
    pub fn get_state(&self) -> DomainState {
        match self.general {
            DomainGeneralState::InReset => DomainState::InReset,
            DomainGeneralState::Unavailable => DomainState::Unavailable,
            DomainGeneralState::MonitorInstalled => match self.block.reported_state() {
                ReportedState::Known(state) => state,
                ReportedState::Unrecognized(raw) => {
                    log::warn!("domain {}: unrecognized state {raw:#x}", self.index);
                    DomainState::InvalidState
                }
            },
        }
    }

    /// Drive the domain to `MonitorReady`, whatever state it is in:
    /// installs the monitor on a fresh domain, terminates any payload on a
    /// started one. Idempotent. A crashed monitor cannot be recovered from
    /// here.
    pub fn ensure_ready_to_load_payload(&mut self, monitor_image: &[u8]) -> Result<()> {
        match self.general {
            DomainGeneralState::InReset => return self.startup(monitor_image),
            DomainGeneralState::Unavailable => return Err(DomainError::DomainUnavailable),
            DomainGeneralState::MonitorInstalled => {}
        }

        match self.block.reported_state() {
            ReportedState::Known(DomainState::MonitorReady) => Ok(()),
            ReportedState::Known(state) if state.is_payload_state() => self.terminate_payload(),
            ReportedState::Known(state) => Err(DomainError::InappropriateState {
                actual: state,
                required: "a responsive monitor",
            }),
            ReportedState::Unrecognized(raw) => Err(DomainError::UnrecognizedState(raw)),
        }
    }

    /// Stop whatever payload owns the core and restart the monitor.
    pub fn terminate_payload(&mut self) -> Result<()> {
        if self.general != DomainGeneralState::MonitorInstalled {
            return Err(DomainError::MonitorNotInstalled);
        }

        // A pending command must not survive into the restarted monitor.
        self.block.clear_pending_command();

        log::info!("domain {}: ringing restart doorbell", self.index);
        self.machine.ring_restart_doorbell(self.index)?;
        self.await_state(DomainState::MonitorReady, PollPolicy::STARTUP, "monitor restart")
    }

    /// Load a payload image into the payload region and start it. Returns
    /// once the payload has reported itself alive.
    pub fn load_and_start_payload(
        &mut self,
        image: &[u8],
        argument: u64,
        policy: PollPolicy,
    ) -> Result<()> {
        self.require_monitor_ready()?;

        if image.len() > self.layout.payload.size {
            return Err(DomainError::ImageTooLarge {
                size: image.len(),
                limit: self.layout.payload.size,
            });
        }

        let entry = self.layout.payload.base;
        self.machine.write_phys(entry, image)?;

        // Output still in the ring belongs to the previous payload.
        self.block.discard_stale_stdout();

        let crc = crc32(image);
        log::info!(
            "domain {}: starting payload, {} bytes, crc {crc:#010x}",
            self.index,
            image.len()
        );
        self.block.send_start_payload(StartPayloadArgs {
            entry_address: entry,
            size: image.len() as u64,
            crc,
            argument,
        });

        self.await_ack(policy, "start acknowledgement")?;

        match self.block.cmd_resp() {
            Some(Response::CrcOk) => {}
            Some(resp) => return Err(DomainError::PayloadRejected(resp)),
            None => return Err(DomainError::UnrecognizedState(self.block.cmd_resp_raw())),
        }

        self.await_payload_running(policy)
    }

    /// Send the sentinel start command: the monitor parks in its idle stub
    /// so a debugger can hot-load payload code by hand. The command is
    /// deliberately never acknowledged.
    pub fn start_dummy_payload(&mut self) -> Result<()> {
        self.require_monitor_ready()?;

        self.block.send_start_payload(StartPayloadArgs {
            entry_address: DUMMY_PAYLOAD_ENTRY,
            size: 0,
            crc: 0,
            argument: 0,
        });

        // No ack will come; wait only for the state transition.
        self.await_state(
            DomainState::StartingPayload,
            PollPolicy::STARTUP,
            "idle stub entry",
        )?;

        if self.block.command_acknowledged() {
            return Err(DomainError::InappropriateState {
                actual: self.get_state(),
                required: "an unacknowledged sentinel start",
            });
        }
        Ok(())
    }

    /// Non-blocking read of one byte of payload output.
    pub fn getchar(&mut self) -> Option<u8> {
        if self.general != DomainGeneralState::MonitorInstalled {
            return None;
        }
        self.block.pop_stdout()
    }

    /// Detached consumer handle for the output ring, for handing to an
    /// [`OutputPump`](crate::console::OutputPump) thread. While a pump holds
    /// it, the pump is the ring's sole consumer; interleaving `getchar`
    /// calls would steal bytes from it.
    pub fn output_handle(&self) -> ManagerSide {
        self.block
    }

    /// Forensic summary; only meaningful once the domain has crashed.
    pub fn get_crash_info(&self) -> Result<CrashInfo> {
        let state = self.require_crashed()?;

        let desc_bytes = self.block.fault_desc();
        let len = desc_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(desc_bytes.len());
        let desc = String::from_utf8_lossy(&desc_bytes[..len]).into_owned();

        Ok(CrashInfo {
            state,
            el: self.block.fault_el(),
            pc: self.block.fault_pc(),
            desc,
        })
    }

    /// Write an ELF core dump of the crashed domain: register notes plus
    /// the full payload region. The file appears atomically or not at all.
    pub fn dump_core(&self, path: &Path) -> Result<()> {
        self.require_crashed()?;

        let region = self.layout.payload;
        let mut memory = vec![0u8; region.size];
        self.machine.read_phys(region.base, &mut memory)?;

        coredump::write_core_dump(
            path,
            &self.block.regs(),
            &self.block.fpregs(),
            region.base,
            &memory,
        )
    }

    /// Human-readable dump of the protocol block, for bug reports.
    pub fn dump_debug_info(&self, flags: DebugDumpFlags, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "domain {}: {:?}", self.index, self.general)?;

        if self.general != DomainGeneralState::MonitorInstalled {
            return Ok(());
        }

        if flags.contains(DebugDumpFlags::STATE) {
            writeln!(out, "  state: {:?}", self.block.reported_state())?;
            writeln!(
                out,
                "  cmd_seq: {}  cmd_ack: {}  cmd_resp: {:#x}",
                self.block.cmd_seq(),
                self.block.cmd_ack(),
                self.block.cmd_resp_raw()
            )?;
        }

        if flags.contains(DebugDumpFlags::FAULT) {
            let desc = self.block.fault_desc();
            let len = desc.iter().position(|&b| b == 0).unwrap_or(desc.len());
            writeln!(
                out,
                "  fault: el {} pc {:#x} desc {:?}",
                self.block.fault_el(),
                self.block.fault_pc(),
                String::from_utf8_lossy(&desc[..len])
            )?;
        }

        if flags.contains(DebugDumpFlags::REGS) {
            let regs = self.block.regs();
            for (i, chunk) in regs.regs.chunks(4).enumerate() {
                write!(out, "  ")?;
                for (j, reg) in chunk.iter().enumerate() {
                    write!(out, "x{:<2} {:#018x}  ", i * 4 + j, reg)?;
                }
                writeln!(out)?;
            }
            writeln!(
                out,
                "  sp {:#018x}  pc {:#018x}  pstate {:#x}",
                regs.sp, regs.pc, regs.pstate
            )?;
        }

        if flags.contains(DebugDumpFlags::RING) {
            writeln!(
                out,
                "  stdout ring: rdpos {} wrpos {}",
                self.block.stdout_rdpos(),
                self.block.stdout_wrpos()
            )?;
        }

        Ok(())
    }

    fn require_monitor_ready(&self) -> Result<()> {
        match self.general {
            DomainGeneralState::InReset => return Err(DomainError::MonitorNotInstalled),
            DomainGeneralState::Unavailable => return Err(DomainError::DomainUnavailable),
            DomainGeneralState::MonitorInstalled => {}
        }
        match self.block.reported_state() {
            ReportedState::Known(DomainState::MonitorReady) => Ok(()),
            ReportedState::Known(state) => Err(DomainError::InappropriateState {
                actual: state,
                required: "monitor_ready",
            }),
            ReportedState::Unrecognized(raw) => Err(DomainError::UnrecognizedState(raw)),
        }
    }

    fn require_crashed(&self) -> Result<DomainState> {
        match self.get_state() {
            state @ (DomainState::CrashedPayload | DomainState::CrashedMonitor) => Ok(state),
            actual => Err(DomainError::InappropriateState {
                actual,
                required: "a crashed domain",
            }),
        }
    }

    fn await_state(
        &self,
        want: DomainState,
        policy: PollPolicy,
        waiting_for: &'static str,
    ) -> Result<()> {
        let deadline = Instant::now() + policy.timeout;
        loop {
            if self.block.reported_state() == ReportedState::Known(want) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DomainError::Timeout {
                    waiting_for,
                    timeout: policy.timeout,
                });
            }
            std::thread::sleep(policy.interval);
        }
    }

    fn await_ack(&self, policy: PollPolicy, waiting_for: &'static str) -> Result<()> {
        let deadline = Instant::now() + policy.timeout;
        loop {
            if self.block.command_acknowledged() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DomainError::Timeout {
                    waiting_for,
                    timeout: policy.timeout,
                });
            }
            std::thread::sleep(policy.interval);
        }
    }

    /// Wait for the payload to report in; a crash during startup surfaces
    /// immediately instead of burning the whole timeout.
    fn await_payload_running(&self, policy: PollPolicy) -> Result<()> {
        let deadline = Instant::now() + policy.timeout;
        loop {
            match self.block.reported_state() {
                ReportedState::Known(DomainState::RunningPayload) => return Ok(()),
                ReportedState::Known(DomainState::CrashedPayload) => {
                    return Err(DomainError::PayloadCrashedDuringStartup)
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(DomainError::Timeout {
                    waiting_for: "payload startup report",
                    timeout: policy.timeout,
                });
            }
            std::thread::sleep(policy.interval);
        }
    }
}
