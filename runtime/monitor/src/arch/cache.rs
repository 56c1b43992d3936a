//! Data cache maintenance by virtual address
//!
//! The manager writes payload images from another cluster member; before
//! the monitor reads (or executes) them, the affected lines must be
//! invalidated so stale data cannot satisfy the reads.

/// Cache line size of the reference core (Cortex-A53).
const LINE: u64 = 64;

/// Invalidate the data cache over `[base, base + size)`, then synchronize.
pub unsafe fn invalidate_range(base: u64, size: usize) {
    let start = base & !(LINE - 1);
    let end = base + size as u64;

    let mut addr = start;
    while addr < end {
        core::arch::asm!("dc ivac, {}", in(reg) addr, options(nostack));
        addr += LINE;
    }

    core::arch::asm!("dsb sy", "isb", options(nostack));
}

/// Invalidate the instruction cache. Payload code may sit where previous
/// payload code was already fetched.
pub unsafe fn invalidate_icache() {
    core::arch::asm!("ic iallu", "dsb sy", "isb", options(nostack));
}
