//! Safe wrappers over the mediated service calls

use domctl_protocol::smc::{
    AbiVersion, GET_ABI_VERSION, GIC_IRQ_CONFIGURE, GIC_IRQ_DISABLE, GIC_IRQ_ENABLE,
    NOTIFY_PAYLOAD_CRASHED, NOTIFY_PAYLOAD_STARTED, WRITE_STDOUT,
};

use crate::smc::smc_call;

/// Report successful startup. Called once by the `declare_payload!` glue;
/// until this call the manager considers the payload still starting.
pub fn notify_started() {
    smc_call(NOTIFY_PAYLOAD_STARTED, 0, 0, 0);
}

/// Report a self-detected crash and stop for good. `desc` should be a
/// short NUL-terminated tag; `pc` the faulting location, if known.
pub fn notify_crashed(desc: &core::ffi::CStr, pc: u64) -> ! {
    smc_call(
        NOTIFY_PAYLOAD_CRASHED,
        desc.as_ptr() as u64,
        pc,
        0,
    );
    // The monitor parks the core during the call; this is unreachable on
    // real hardware but keeps the signature honest.
    loop {
        core::hint::spin_loop();
    }
}

/// Push bytes into the shared output ring. Returns the claimed count; on a
/// clogged ring overflowing bytes are dropped, not retried.
pub fn write_stdout(data: &[u8]) -> usize {
    smc_call(WRITE_STDOUT, data.as_ptr() as u64, data.len() as u64, 0) as usize
}

/// ABI version implemented by the monitor this payload runs under.
pub fn monitor_abi_version() -> AbiVersion {
    AbiVersion::from_packed(smc_call(GET_ABI_VERSION, 0, 0, 0))
}

/// Route a peripheral interrupt to this core at the given priority.
/// The monitor refuses priorities in its reserved band.
pub fn configure_interrupt(irq: u64, priority: u64) -> bool {
    smc_call(GIC_IRQ_CONFIGURE, irq, priority, 0) == 0
}

pub fn enable_interrupt(irq: u64) {
    smc_call(GIC_IRQ_ENABLE, irq, 0, 0);
}

pub fn disable_interrupt(irq: u64) {
    smc_call(GIC_IRQ_DISABLE, irq, 0, 0);
}
