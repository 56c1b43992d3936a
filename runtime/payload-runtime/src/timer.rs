//! Generic Timer access
//!
//! The monitor seeds CNTFRQ_EL0 at boot (there is no firmware on this core
//! to have done it), so payloads can use the counter directly.

/// Counter frequency in Hz.
pub fn frequency() -> u64 {
    let cntfrq: u64;
    unsafe {
        core::arch::asm!("mrs {}, cntfrq_el0", out(reg) cntfrq, options(nomem, nostack));
    }
    cntfrq
}

/// Current counter value.
pub fn ticks() -> u64 {
    let cntpct: u64;
    unsafe {
        core::arch::asm!("isb", "mrs {}, cntpct_el0", out(reg) cntpct, options(nostack));
    }
    cntpct
}

/// Busy-wait for the given number of microseconds.
pub fn delay_us(us: u64) {
    let end = ticks() + us * frequency() / 1_000_000;
    while ticks() < end {
        core::hint::spin_loop();
    }
}

/// Non-secure EL1 physical timer interrupt (PPI 14).
pub const PHYSICAL_TIMER_IRQ: u64 = 30;

const CNTP_CTL_ENABLE: u64 = 1;

/// Arm the EL1 physical timer to fire every `period_us` microseconds and
/// route its interrupt to this core. Returns `false` if the priority falls
/// in the monitor's reserved band.
pub fn start_periodic(period_us: u64, priority: u64) -> bool {
    if !crate::rt::configure_interrupt(PHYSICAL_TIMER_IRQ, priority) {
        return false;
    }
    rearm_periodic(period_us);
    unsafe {
        core::arch::asm!(
            "msr cntp_ctl_el0, {}",
            in(reg) CNTP_CTL_ENABLE,
            options(nomem, nostack),
        );
    }
    crate::rt::enable_interrupt(PHYSICAL_TIMER_IRQ);
    true
}

/// Reload the countdown; call this from the interrupt handler to keep the
/// timer periodic.
pub fn rearm_periodic(period_us: u64) {
    let downcount = period_us * frequency() / 1_000_000;
    unsafe {
        core::arch::asm!(
            "msr cntp_tval_el0, {}",
            in(reg) downcount,
            options(nomem, nostack),
        );
    }
}

/// Disable the timer and its interrupt.
pub fn stop_periodic() {
    unsafe {
        core::arch::asm!("msr cntp_ctl_el0, xzr", options(nomem, nostack));
    }
    crate::rt::disable_interrupt(PHYSICAL_TIMER_IRQ);
}
