//! GICv2 plumbing for the monitor
//!
//! Two concerns only: the restart doorbell (an SGI the manager raises
//! through the distributor to reset this monitor) and the payload-requested
//! peripheral interrupts routed by the mediated service calls.

use core::ptr::{read_volatile, write_volatile};

/// Distributor and CPU interface of the reference platform.
const GICD_BASE: u64 = 0xF901_0000;
const GICC_BASE: u64 = 0xF902_0000;

const GICD_IGROUPR: u64 = GICD_BASE + 0x080;
const GICD_ISENABLER: u64 = GICD_BASE + 0x100;
const GICD_ICENABLER: u64 = GICD_BASE + 0x180;
const GICD_IPRIORITYR: u64 = GICD_BASE + 0x400;
const GICD_ITARGETSR: u64 = GICD_BASE + 0x800;

const GICC_CTLR: u64 = GICC_BASE + 0x000;
const GICC_PMR: u64 = GICC_BASE + 0x004;
const GICC_IAR: u64 = GICC_BASE + 0x00C;
const GICC_EOIR: u64 = GICC_BASE + 0x010;

/// SGI the manager raises to reset this monitor.
pub const RESTART_DOORBELL_SGI: u64 = 14;

/// Priority of the doorbell; numerically below (more urgent than) anything
/// a payload may configure.
const DOORBELL_PRIORITY: u8 = 0x10;

unsafe fn write32(addr: u64, value: u32) {
    write_volatile(addr as *mut u32, value);
}

unsafe fn read32(addr: u64) -> u32 {
    read_volatile(addr as *const u32)
}

/// Largest interrupt ID the reference distributor implements.
const MAX_IRQ: u64 = 192;

/// CPU interface: enable Group 0 and Group 1, and signal Group 0 as FIQ.
const GICC_CTLR_ENABLE_GRP0: u32 = 1 << 0;
const GICC_CTLR_ENABLE_GRP1: u32 = 1 << 1;
const GICC_CTLR_FIQ_EN: u32 = 1 << 3;

/// Bring up this core's CPU interface and enable the restart doorbell.
///
/// The doorbell is Group 0 and therefore signalled as FIQ; with the FIQ
/// route held at EL3 it lands no matter what the payload has masked in
/// its own PSTATE. Payload-routed interrupts stay in Group 1 / IRQ.
///
/// Also runs after a restart doorbell, so anything the previous payload
/// had routed here must be torn down first.
pub fn init(cpu_index: usize) {
    for bank in 0..MAX_IRQ / 32 {
        unsafe {
            write32(GICD_ICENABLER + bank * 4, 0xFFFF_FFFF);
            // Everything defaults to Group 1 (IRQ).
            write32(GICD_IGROUPR + bank * 4, 0xFFFF_FFFF);
        }
    }

    unsafe {
        // Doorbell SGI to Group 0; it lives in the first group bank.
        let group0 = read32(GICD_IGROUPR) & !(1u32 << RESTART_DOORBELL_SGI);
        write32(GICD_IGROUPR, group0);

        // Accept everything; per-interrupt priorities do the filtering.
        write32(GICC_PMR, 0xFF);
        write32(
            GICC_CTLR,
            GICC_CTLR_ENABLE_GRP0 | GICC_CTLR_ENABLE_GRP1 | GICC_CTLR_FIQ_EN,
        );
    }

    set_priority(RESTART_DOORBELL_SGI, DOORBELL_PRIORITY);
    set_target(RESTART_DOORBELL_SGI, cpu_index);
    enable(RESTART_DOORBELL_SGI);
}

pub fn set_priority(irq: u64, priority: u8) {
    unsafe {
        write_volatile((GICD_IPRIORITYR + irq) as *mut u8, priority);
    }
}

pub fn set_target(irq: u64, cpu_index: usize) {
    unsafe {
        write_volatile((GICD_ITARGETSR + irq) as *mut u8, 1 << cpu_index);
    }
}

pub fn enable(irq: u64) {
    unsafe {
        write32(GICD_ISENABLER + (irq / 32) * 4, 1 << (irq % 32));
    }
}

pub fn disable(irq: u64) {
    unsafe {
        write32(GICD_ICENABLER + (irq / 32) * 4, 1 << (irq % 32));
    }
}

/// Acknowledge the highest-priority pending interrupt.
pub fn acknowledge() -> u64 {
    unsafe { (read32(GICC_IAR) & 0x3FF) as u64 }
}

pub fn end_of_interrupt(irq: u64) {
    unsafe {
        write32(GICC_EOIR, irq as u32);
    }
}
