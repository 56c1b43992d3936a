//! Crash capture
//!
//! When the payload faults (or reports its own crash), the monitor freezes
//! the forensic record in the protocol block and then parks the core: the
//! register snapshot, fault address and description stay valid until the
//! manager restarts the domain. A fault taken by the monitor itself is
//! terminal for the domain.

use domctl_protocol::{Aarch64FpRegs, Aarch64Regs, DomainState, ExecutorSide};

/// Which side of the privilege boundary faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashingEntity {
    Payload,
    Monitor,
}

impl CrashingEntity {
    fn crashed_state(self) -> DomainState {
        match self {
            CrashingEntity::Payload => DomainState::CrashedPayload,
            CrashingEntity::Monitor => DomainState::CrashedMonitor,
        }
    }
}

/// Freeze the crash record. The register snapshot lands first, the state
/// transition last, so a manager that observes the crashed state always
/// sees a complete record.
pub fn report_crash(
    executor: &ExecutorSide,
    entity: CrashingEntity,
    desc: &str,
    el: u32,
    fault_pc: u64,
    regs: &Aarch64Regs,
    fpregs: &Aarch64FpRegs,
) {
    executor.store_regs(regs);
    executor.store_fpregs(fpregs);
    executor.record_fault(el, fault_pc, desc);
    executor.set_state(entity.crashed_state());

    log::error!("{desc} at pc {fault_pc:#x} (EL{el})");
}
