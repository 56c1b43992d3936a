//! Mediated service calls from the payload
//!
//! The payload runs deprivileged and traps into the monitor via `smc` for
//! the few actions the monitor mediates. The function number arrives in x0,
//! arguments in x1..x3, and for ordinary calls the result goes back in x0.
//! An unknown function number is treated as monitor corruption, not as a
//! recoverable payload error.

use domctl_protocol::smc;
use domctl_protocol::{DomainState, ExecutorSide, FAULT_DESC_LEN};

use crate::platform::MonitorPlatform;

/// What the exception handler should do after an `smc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmcOutcome {
    /// Write the value into the payload's x0 and resume it.
    Return(u64),
    /// The payload reported its own crash; park the core.
    PayloadCrashed,
    /// The call was not recognized; the monitor state is suspect. The
    /// caller records a monitor crash and parks the core.
    UnknownCall,
}

/// Dispatch one `smc` from the payload.
///
/// For `NOTIFY_PAYLOAD_CRASHED` the caller still owns the register
/// snapshot; this function records the description and fault pc, the caller
/// stores the registers and flips the state via `crash::report_crash`.
pub fn handle_smc<P: MonitorPlatform>(
    executor: &ExecutorSide,
    platform: &mut P,
    function: u64,
    args: [u64; 3],
) -> SmcOutcome {
    match function {
        smc::NOTIFY_PAYLOAD_STARTED => {
            executor.set_state(DomainState::RunningPayload);
            SmcOutcome::Return(0)
        }

        smc::NOTIFY_PAYLOAD_CRASHED => {
            let desc = read_payload_cstr(platform, args[0]);
            let desc = core::str::from_utf8(&desc.0[..desc.1]).unwrap_or("(bad description)");
            executor.record_fault(1, args[1], desc);
            SmcOutcome::PayloadCrashed
        }

        smc::WRITE_STDOUT => {
            let mut remaining = args[1] as usize;
            let mut addr = args[0];
            let mut claimed = 0usize;
            let mut chunk = [0u8; 64];

            while remaining > 0 {
                let want = remaining.min(chunk.len());
                let got = platform.copy_from_payload(addr, &mut chunk[..want]);
                if got == 0 {
                    break;
                }
                claimed += executor.write_stdout(&chunk[..got]);
                addr += got as u64;
                remaining -= got;
            }

            SmcOutcome::Return(claimed as u64)
        }

        smc::GET_ABI_VERSION => SmcOutcome::Return(smc::ABI_VERSION.to_packed()),

        smc::GIC_IRQ_CONFIGURE => {
            let (irq, priority) = (args[0], args[1]);
            if !(smc::PAYLOAD_PRIORITY_MIN_VALUE..=smc::PAYLOAD_PRIORITY_MAX_VALUE)
                .contains(&priority)
            {
                log::warn!("payload requested reserved irq priority {priority:#x}");
                return SmcOutcome::Return(1);
            }
            platform.configure_interrupt(irq, priority);
            SmcOutcome::Return(0)
        }

        smc::GIC_IRQ_ENABLE => {
            platform.enable_interrupt(args[0]);
            SmcOutcome::Return(0)
        }

        smc::GIC_IRQ_DISABLE => {
            platform.disable_interrupt(args[0]);
            SmcOutcome::Return(0)
        }

        other => {
            log::error!("unknown smc function {other:#x}");
            SmcOutcome::UnknownCall
        }
    }
}

/// Copy a NUL-terminated string out of payload memory, truncated to the
/// fault description length.
fn read_payload_cstr<P: MonitorPlatform>(platform: &P, addr: u64) -> ([u8; FAULT_DESC_LEN], usize) {
    let mut buf = [0u8; FAULT_DESC_LEN];
    let got = platform.copy_from_payload(addr, &mut buf);
    let len = buf[..got].iter().position(|&b| b == 0).unwrap_or(got);
    (buf, len)
}
