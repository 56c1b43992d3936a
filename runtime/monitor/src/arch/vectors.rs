//! EL3 exception vector table and handlers
//!
//! The monitor regains control from the payload only through this table:
//! `smc` lands in the lower-EL synchronous vector, payload faults land
//! there too, and the manager's restart doorbell arrives as a Group-0 FIQ
//! routed to EL3. Anything else taken at the monitor's level means the
//! monitor itself is broken.

use core::arch::global_asm;

use domctl_protocol::{Aarch64FpRegs, Aarch64Regs, DomainState};

use crate::crash::{report_crash, CrashingEntity};
use crate::smc::{handle_smc, SmcOutcome};

use super::{context, gic, park, HwPlatform};

// Each vector entry branches to a stub that saves the general-purpose
// context, calls the Rust handler with a pointer to the frame, restores
// and erets. 128 bytes per entry as the architecture demands.
global_asm!(
    ".macro save_context",
    "    sub sp, sp, #0x100",
    "    stp x0, x1, [sp, #0x00]",
    "    stp x2, x3, [sp, #0x10]",
    "    stp x4, x5, [sp, #0x20]",
    "    stp x6, x7, [sp, #0x30]",
    "    stp x8, x9, [sp, #0x40]",
    "    stp x10, x11, [sp, #0x50]",
    "    stp x12, x13, [sp, #0x60]",
    "    stp x14, x15, [sp, #0x70]",
    "    stp x16, x17, [sp, #0x80]",
    "    stp x18, x19, [sp, #0x90]",
    "    stp x20, x21, [sp, #0xA0]",
    "    stp x22, x23, [sp, #0xB0]",
    "    stp x24, x25, [sp, #0xC0]",
    "    stp x26, x27, [sp, #0xD0]",
    "    stp x28, x29, [sp, #0xE0]",
    "    str x30, [sp, #0xF0]",
    ".endm",

    ".macro restore_context",
    "    ldp x0, x1, [sp, #0x00]",
    "    ldp x2, x3, [sp, #0x10]",
    "    ldp x4, x5, [sp, #0x20]",
    "    ldp x6, x7, [sp, #0x30]",
    "    ldp x8, x9, [sp, #0x40]",
    "    ldp x10, x11, [sp, #0x50]",
    "    ldp x12, x13, [sp, #0x60]",
    "    ldp x14, x15, [sp, #0x70]",
    "    ldp x16, x17, [sp, #0x80]",
    "    ldp x18, x19, [sp, #0x90]",
    "    ldp x20, x21, [sp, #0xA0]",
    "    ldp x22, x23, [sp, #0xB0]",
    "    ldp x24, x25, [sp, #0xC0]",
    "    ldp x26, x27, [sp, #0xD0]",
    "    ldp x28, x29, [sp, #0xE0]",
    "    ldr x30, [sp, #0xF0]",
    "    add sp, sp, #0x100",
    ".endm",

    "vector_stub_lower_sync:",
    "    save_context",
    "    mov x0, sp",
    "    bl lower_el_sync_handler",
    "    restore_context",
    "    eret",

    "vector_stub_irq:",
    "    save_context",
    "    mov x0, sp",
    "    bl irq_handler",
    "    restore_context",
    "    eret",

    "vector_stub_fiq:",
    "    save_context",
    "    mov x0, sp",
    "    bl fiq_handler",
    "    restore_context",
    "    eret",

    "vector_stub_curr_sync:",
    "    save_context",
    "    mov x0, sp",
    "    bl curr_el_sync_handler",
    "    restore_context",
    "    eret",

    "vector_stub_unhandled:",
    "    save_context",
    "    mov x0, sp",
    "    bl unhandled_vector_handler",
    "    restore_context",
    "    eret",

    ".section .text.exception_vectors",
    ".balign 2048",
    ".global exception_vector_table",
    "exception_vector_table:",

    // Current EL with SP_EL0 (never used; the monitor runs on SP_EL3)
    ".balign 0x80",
    "    b vector_stub_unhandled",
    ".balign 0x80",
    "    b vector_stub_unhandled",
    ".balign 0x80",
    "    b vector_stub_unhandled",
    ".balign 0x80",
    "    b vector_stub_unhandled",

    // Current EL with SP_ELx: the monitor's own faults and interrupts
    ".balign 0x80",
    "    b vector_stub_curr_sync",
    ".balign 0x80",
    "    b vector_stub_irq",
    ".balign 0x80",
    "    b vector_stub_fiq",
    ".balign 0x80",
    "    b vector_stub_unhandled",

    // Lower EL (AArch64): payload smc, payload faults, the doorbell FIQ
    ".balign 0x80",
    "    b vector_stub_lower_sync",
    ".balign 0x80",
    "    b vector_stub_irq",
    ".balign 0x80",
    "    b vector_stub_fiq",
    ".balign 0x80",
    "    b vector_stub_unhandled",

    // Lower EL (AArch32): not supported
    ".balign 0x80",
    "    b vector_stub_unhandled",
    ".balign 0x80",
    "    b vector_stub_unhandled",
    ".balign 0x80",
    "    b vector_stub_unhandled",
    ".balign 0x80",
    "    b vector_stub_unhandled",
);

/// General-purpose context as saved by the vector stubs.
#[repr(C)]
pub struct TrapFrame {
    pub x: [u64; 31],
    _pad: u64,
}

const EC_SMC64: u64 = 0x17;

fn read_esr() -> u64 {
    let esr: u64;
    unsafe {
        core::arch::asm!("mrs {}, esr_el3", out(reg) esr, options(nomem, nostack));
    }
    esr
}

fn read_elr() -> u64 {
    let elr: u64;
    unsafe {
        core::arch::asm!("mrs {}, elr_el3", out(reg) elr, options(nomem, nostack));
    }
    elr
}

fn snapshot_regs(frame: &TrapFrame) -> Aarch64Regs {
    let mut regs = Aarch64Regs::zeroed();
    regs.regs = frame.x;
    unsafe {
        core::arch::asm!("mrs {}, sp_el1", out(reg) regs.sp, options(nomem, nostack));
        core::arch::asm!("mrs {}, spsr_el3", out(reg) regs.pstate, options(nomem, nostack));
    }
    regs.pc = read_elr();
    regs
}

fn snapshot_fpregs() -> Aarch64FpRegs {
    let mut fp = Aarch64FpRegs::zeroed();
    unsafe {
        let base = fp.vregs.as_mut_ptr();
        core::arch::asm!(
            "stp q0, q1, [{0}, #0x000]",
            "stp q2, q3, [{0}, #0x020]",
            "stp q4, q5, [{0}, #0x040]",
            "stp q6, q7, [{0}, #0x060]",
            "stp q8, q9, [{0}, #0x080]",
            "stp q10, q11, [{0}, #0x0A0]",
            "stp q12, q13, [{0}, #0x0C0]",
            "stp q14, q15, [{0}, #0x0E0]",
            "stp q16, q17, [{0}, #0x100]",
            "stp q18, q19, [{0}, #0x120]",
            "stp q20, q21, [{0}, #0x140]",
            "stp q22, q23, [{0}, #0x160]",
            "stp q24, q25, [{0}, #0x180]",
            "stp q26, q27, [{0}, #0x1A0]",
            "stp q28, q29, [{0}, #0x1C0]",
            "stp q30, q31, [{0}, #0x1E0]",
            in(reg) base,
            options(nostack)
        );
        let fpsr: u64;
        let fpcr: u64;
        core::arch::asm!("mrs {}, fpsr", out(reg) fpsr, options(nomem, nostack));
        core::arch::asm!("mrs {}, fpcr", out(reg) fpcr, options(nomem, nostack));
        fp.fpsr = fpsr as u32;
        fp.fpcr = fpcr as u32;
    }
    fp
}

/// Human-readable tag for the exception class, as it appears in the fault
/// description field.
fn describe_exception_class(ec: u64) -> &'static str {
    match ec {
        0x00 => "unknown exception",
        0x0E => "illegal execution state",
        0x20 | 0x21 => "instruction abort",
        0x22 => "pc alignment fault",
        0x24 | 0x25 => "data abort",
        0x26 => "sp alignment fault",
        0x2C => "fp exception",
        0x2F => "serror",
        0x30 | 0x31 => "breakpoint",
        0x3C => "brk instruction",
        _ => "synchronous exception",
    }
}

#[no_mangle]
extern "C" fn lower_el_sync_handler(frame: &mut TrapFrame) {
    let ctx = context();
    let esr = read_esr();
    let ec = (esr >> 26) & 0x3F;

    if ec == EC_SMC64 {
        let mut platform = HwPlatform::new(ctx.layout);
        let function = frame.x[0];
        let args = [frame.x[1], frame.x[2], frame.x[3]];

        match handle_smc(&ctx.executor, &mut platform, function, args) {
            SmcOutcome::Return(value) => {
                frame.x[0] = value;
            }
            SmcOutcome::PayloadCrashed => {
                // Description and fault pc were recorded by the handler;
                // complete the record with the register snapshot.
                ctx.executor.store_regs(&snapshot_regs(frame));
                ctx.executor.store_fpregs(&snapshot_fpregs());
                ctx.executor.set_state(DomainState::CrashedPayload);
                park();
            }
            SmcOutcome::UnknownCall => {
                report_crash(
                    &ctx.executor,
                    CrashingEntity::Monitor,
                    "unknown smc",
                    3,
                    read_elr(),
                    &snapshot_regs(frame),
                    &snapshot_fpregs(),
                );
                park();
            }
        }
        return;
    }

    // Anything else from the lower EL is a payload fault.
    report_crash(
        &ctx.executor,
        CrashingEntity::Payload,
        describe_exception_class(ec),
        1,
        read_elr(),
        &snapshot_regs(frame),
        &snapshot_fpregs(),
    );
    park();
}

#[no_mangle]
extern "C" fn curr_el_sync_handler(frame: &mut TrapFrame) {
    let ctx = context();
    let ec = (read_esr() >> 26) & 0x3F;

    report_crash(
        &ctx.executor,
        CrashingEntity::Monitor,
        describe_exception_class(ec),
        3,
        read_elr(),
        &snapshot_regs(frame),
        &snapshot_fpregs(),
    );
    park();
}

#[no_mangle]
extern "C" fn fiq_handler(frame: &mut TrapFrame) {
    let irq = gic::acknowledge();

    if irq == gic::RESTART_DOORBELL_SGI {
        gic::end_of_interrupt(irq);
        // Full monitor reset: back through the boot path, which reinstalls
        // the stack and re-announces readiness.
        extern "C" {
            fn _start() -> !;
        }
        unsafe { _start() }
    }

    // The doorbell is the only Group-0 interrupt the monitor ever
    // configures; anything else here is a misrouting.
    gic::end_of_interrupt(irq);
    let ctx = context();
    report_crash(
        &ctx.executor,
        CrashingEntity::Monitor,
        "unexpected fiq",
        3,
        read_elr(),
        &snapshot_regs(frame),
        &snapshot_fpregs(),
    );
    park();
}

#[no_mangle]
extern "C" fn irq_handler(frame: &mut TrapFrame) {
    // Payload-routed interrupts are Group 1 and taken at the payload's
    // own level; an IRQ landing at EL3 means the routing is broken.
    let irq = gic::acknowledge();
    gic::end_of_interrupt(irq);

    let ctx = context();
    report_crash(
        &ctx.executor,
        CrashingEntity::Monitor,
        "unexpected interrupt",
        3,
        read_elr(),
        &snapshot_regs(frame),
        &snapshot_fpregs(),
    );
    park();
}

#[no_mangle]
extern "C" fn unhandled_vector_handler(frame: &mut TrapFrame) {
    let ctx = context();
    report_crash(
        &ctx.executor,
        CrashingEntity::Monitor,
        "unhandled vector",
        3,
        read_elr(),
        &snapshot_regs(frame),
        &snapshot_fpregs(),
    );
    park();
}
