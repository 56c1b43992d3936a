//! `MonitorPlatform` over the real machine

use domctl_protocol::MemoryLayout;

use crate::platform::MonitorPlatform;

use super::{cache, gic, park};

/// EL3 implementation. Carries no state beyond the domain layout: memory
/// is flat-mapped, everything else is system registers and the GIC.
#[derive(Clone, Copy)]
pub struct HwPlatform {
    layout: MemoryLayout,
}

impl HwPlatform {
    pub fn new(layout: MemoryLayout) -> Self {
        Self { layout }
    }

    fn cpu_index(&self) -> usize {
        let mpidr: u64;
        unsafe {
            core::arch::asm!("mrs {}, mpidr_el1", out(reg) mpidr, options(nomem, nostack));
        }
        (mpidr & 0xFF) as usize
    }
}

impl MonitorPlatform for HwPlatform {
    fn set_timer_frequency(&mut self, cntfrq: u32) {
        unsafe {
            core::arch::asm!(
                "msr cntfrq_el0, {}",
                in(reg) cntfrq as u64,
                options(nomem, nostack)
            );
        }
    }

    fn setup_interrupts(&mut self) {
        // NS=1 (payload runs non-secure), FIQ=1 (Group-0 interrupts trap
        // to EL3 regardless of lower-EL masking), RW=1 (lower EL is
        // AArch64). The doorbell rides the FIQ route, so the payload
        // cannot mask it out from under the manager.
        const SCR_NS: u64 = 1 << 0;
        const SCR_FIQ: u64 = 1 << 2;
        const SCR_RW: u64 = 1 << 10;
        unsafe {
            core::arch::asm!(
                "msr scr_el3, {}",
                "isb",
                in(reg) SCR_NS | SCR_FIQ | SCR_RW,
                options(nomem, nostack)
            );
        }

        gic::init(self.cpu_index());

        unsafe {
            // Unmask FIQ and IRQ at EL3. The doorbell arrives as FIQ;
            // IRQ is unmasked too so a stray one is reported instead of
            // sitting pended.
            core::arch::asm!("msr daifclr, #3", options(nomem, nostack));
        }
    }

    fn sync_payload_range(&mut self, base: u64, size: usize) {
        unsafe {
            cache::invalidate_range(base, size);
            cache::invalidate_icache();
        }
    }

    fn image_bytes(&self, base: u64, size: usize) -> Option<&[u8]> {
        let region = self.layout.payload;
        if !region.contains(base) || base + size as u64 > region.end() {
            return None;
        }
        // Flat physical mapping; the range was just bounds-checked.
        Some(unsafe { core::slice::from_raw_parts(base as *const u8, size) })
    }

    fn copy_from_payload(&self, addr: u64, out: &mut [u8]) -> usize {
        let region = self.layout.payload;
        if !region.contains(addr) {
            return 0;
        }
        let len = out.len().min((region.end() - addr) as usize);
        unsafe {
            core::ptr::copy_nonoverlapping(addr as *const u8, out.as_mut_ptr(), len);
        }
        len
    }

    fn enter_payload(&mut self, entry: u64, argument: u64) {
        unsafe {
            // EL1h with interrupts initially masked; the payload runtime
            // unmasks once its own vectors are live. The monitor comes
            // back only through the vector table.
            core::arch::asm!(
                "msr elr_el3, {entry}",
                "msr spsr_el3, {spsr}",
                "eret",
                entry = in(reg) entry,
                spsr = in(reg) 0x3C5u64,
                in("x0") argument,
                options(noreturn)
            );
        }
    }

    fn enter_idle_stub(&mut self) {
        park()
    }

    fn configure_interrupt(&mut self, irq: u64, priority: u64) {
        gic::set_priority(irq, priority as u8);
        gic::set_target(irq, self.cpu_index());
        gic::enable(irq);
    }

    fn enable_interrupt(&mut self, irq: u64) {
        gic::enable(irq);
    }

    fn disable_interrupt(&mut self, irq: u64) {
        gic::disable(irq);
    }
}
