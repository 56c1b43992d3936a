//! EL3 hardware platform for the reference board (quad Cortex-A53, GICv2)
//!
//! The monitor image is linked to run out of its domain's monitor code
//! region with the MMU off and a flat physical view, so addresses from the
//! layout tables are used directly. Boot enters `_start` (assembly), which
//! derives the domain from MPIDR, installs the vector table and stack, and
//! calls [`monitor_main`].

mod boot;
mod cache;
mod gic;
mod platform;
mod vectors;

pub use platform::HwPlatform;

use domctl_protocol::{DomainIndex, ExecutorSide, IpcBlock, MemoryLayout};

use crate::dispatch::Monitor;

/// Shared with the exception handlers, which run outside the dispatch
/// engine's call tree. Written once during boot, before exceptions can be
/// taken from a payload.
static mut CONTEXT: Option<ExceptionContext> = None;

pub(crate) struct ExceptionContext {
    pub executor: ExecutorSide,
    pub layout: MemoryLayout,
}

pub(crate) fn context() -> &'static mut ExceptionContext {
    // Single core, exceptions masked until boot finished installing this.
    unsafe {
        match &mut *core::ptr::addr_of_mut!(CONTEXT) {
            Some(ctx) => ctx,
            None => park(),
        }
    }
}

/// Rust entry point, called from `_start` with the stack and vector table
/// already installed.
#[no_mangle]
pub extern "C" fn monitor_main() -> ! {
    let index = match domain_from_mpidr() {
        Some(index) => index,
        // CPU 0 belongs to the hosted OS; a monitor must never run there.
        None => park(),
    };

    let layout = MemoryLayout::for_domain(index);
    let block = layout.monitor_ipc.base as *mut IpcBlock;
    let executor = unsafe { ExecutorSide::new(block) };

    unsafe {
        *core::ptr::addr_of_mut!(CONTEXT) = Some(ExceptionContext { executor, layout });
    }

    let platform = HwPlatform::new(layout);
    Monitor::new(executor, platform, layout).run()
}

fn domain_from_mpidr() -> Option<DomainIndex> {
    let mpidr: u64;
    unsafe {
        core::arch::asm!("mrs {}, mpidr_el1", out(reg) mpidr, options(nomem, nostack));
    }
    match mpidr & 0xFF {
        1 => Some(DomainIndex::Cpu1),
        2 => Some(DomainIndex::Cpu2),
        3 => Some(DomainIndex::Cpu3),
        _ => None,
    }
}

/// Halt this core until the restart doorbell pulls it back through the
/// boot path. Exception entry masks DAIF, and crash handlers park from
/// inside an exception, so FIQ is unmasked here or the doorbell would sit
/// pended against a dead monitor.
pub(crate) fn park() -> ! {
    loop {
        unsafe {
            core::arch::asm!("msr daifclr, #1", "wfi", options(nomem, nostack));
        }
    }
}
