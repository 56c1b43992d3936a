//! Assembly entry: runs on a core freshly released from reset, at EL3,
//! MMU and caches off.
//!
//! Derives the domain base from MPIDR Aff0, installs the vector table and a
//! stack near the top of the monitor code region (below the install
//! cookie), and calls into Rust. Also the target of the restart doorbell:
//! re-entering `_start` is a full monitor reset.

use core::arch::global_asm;

global_asm!(
    ".section .text.boot",
    ".global _start",
    "_start:",
    // Mask everything until the vector table is live.
    "    msr daifset, #0xf",
    // domain base = 0x7800_0000 + (aff0 - 1) * 0x0200_0000
    "    mrs x0, mpidr_el1",
    "    and x0, x0, #0xff",
    "    sub x0, x0, #1",
    "    mov x1, #0x0200",
    "    lsl x1, x1, #16",
    "    mul x0, x0, x1",
    "    mov x2, #0x7800",
    "    lsl x2, x2, #16",
    "    add x0, x0, x2",
    // Stack just below the install cookie word.
    "    mov x1, #0xF000",
    "    add sp, x0, x1",
    "    adrp x1, exception_vector_table",
    "    add x1, x1, :lo12:exception_vector_table",
    "    msr vbar_el3, x1",
    "    isb",
    "    bl monitor_main",
    // monitor_main never returns.
    "1:  wfi",
    "    b 1b",
);
