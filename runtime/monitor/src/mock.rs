//! In-process simulation of the executor platform
//!
//! Backs the [`MonitorPlatform`] trait with a plain host memory buffer so
//! the real dispatch engine can run inside a test process. Privileged
//! actions that would not return on hardware (entering the payload, the
//! idle stub) are recorded instead; the test harness reads them back and
//! plays the payload's part itself.

use std::vec::Vec;

use domctl_protocol::MemoryLayout;

use crate::platform::MonitorPlatform;

/// Where a simulated jump out of the monitor went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnteredTarget {
    Payload { entry: u64, argument: u64 },
    IdleStub,
}

/// Simulated executor platform over one flat buffer that covers the whole
/// domain region (monitor code, protocol block, payload area).
pub struct MockPlatform {
    mem: *mut u8,
    layout: MemoryLayout,
    /// The last simulated jump, if any.
    pub entered: Option<EnteredTarget>,
    pub timer_frequency: Option<u32>,
    pub interrupts_ready: bool,
    pub synced_ranges: Vec<(u64, usize)>,
    pub configured_irqs: Vec<(u64, u64)>,
    pub enabled_irqs: Vec<u64>,
    pub disabled_irqs: Vec<u64>,
}

// The harness hands the platform to its simulated-executor thread.
unsafe impl Send for MockPlatform {}

impl MockPlatform {
    /// # Safety
    /// `mem` must point to a live buffer covering all three regions of
    /// `layout`, at offset 0 for `layout.monitor_code.base`.
    pub unsafe fn new(mem: *mut u8, layout: MemoryLayout) -> Self {
        Self {
            mem,
            layout,
            entered: None,
            timer_frequency: None,
            interrupts_ready: false,
            synced_ranges: Vec::new(),
            configured_irqs: Vec::new(),
            enabled_irqs: Vec::new(),
            disabled_irqs: Vec::new(),
        }
    }

    pub fn take_entered(&mut self) -> Option<EnteredTarget> {
        self.entered.take()
    }

    fn payload_slice(&self, base: u64, size: usize) -> Option<&[u8]> {
        let region = self.layout.payload;
        if !region.contains(base) || base + size as u64 > region.end() {
            return None;
        }
        let offset = (base - self.layout.monitor_code.base) as usize;
        Some(unsafe { core::slice::from_raw_parts(self.mem.add(offset), size) })
    }
}

impl MonitorPlatform for MockPlatform {
    fn set_timer_frequency(&mut self, cntfrq: u32) {
        self.timer_frequency = Some(cntfrq);
    }

    fn setup_interrupts(&mut self) {
        self.interrupts_ready = true;
    }

    fn sync_payload_range(&mut self, base: u64, size: usize) {
        // Host memory is coherent; just record the call.
        self.synced_ranges.push((base, size));
    }

    fn image_bytes(&self, base: u64, size: usize) -> Option<&[u8]> {
        self.payload_slice(base, size)
    }

    fn copy_from_payload(&self, addr: u64, out: &mut [u8]) -> usize {
        let region = self.layout.payload;
        if !region.contains(addr) {
            return 0;
        }
        let available = (region.end() - addr) as usize;
        let len = out.len().min(available);
        match self.payload_slice(addr, len) {
            Some(src) => {
                out[..len].copy_from_slice(src);
                len
            }
            None => 0,
        }
    }

    fn enter_payload(&mut self, entry: u64, argument: u64) {
        self.entered = Some(EnteredTarget::Payload { entry, argument });
    }

    fn enter_idle_stub(&mut self) {
        self.entered = Some(EnteredTarget::IdleStub);
    }

    fn configure_interrupt(&mut self, irq: u64, priority: u64) {
        self.configured_irqs.push((irq, priority));
    }

    fn enable_interrupt(&mut self, irq: u64) {
        self.enabled_irqs.push(irq);
    }

    fn disable_interrupt(&mut self, irq: u64) {
        self.disabled_irqs.push(irq);
    }
}
