//! The seam between the dispatch engine and the machine it runs on

/// Privileged actions the dispatch engine delegates to the platform.
///
/// Exactly two implementations exist: the EL3 hardware platform in `arch`,
/// and the in-process simulation in `mock`. The engine never touches memory
/// outside the protocol block except through this trait.
pub trait MonitorPlatform {
    /// Seed the Generic Timer frequency register. On a core released
    /// straight out of reset no firmware has done this.
    fn set_timer_frequency(&mut self, cntfrq: u32);

    /// Install the monitor's interrupt plumbing (restart doorbell included).
    fn setup_interrupts(&mut self);

    /// Make the given payload range coherent before the monitor reads it.
    /// The manager wrote the image from another core.
    fn sync_payload_range(&mut self, base: u64, size: usize);

    /// Borrow the payload image bytes at `base`. Returns `None` when the
    /// range does not lie fully inside the payload region.
    fn image_bytes(&self, base: u64, size: usize) -> Option<&[u8]>;

    /// Copy up to `out.len()` bytes of payload memory starting at `addr`.
    /// Returns the number of bytes copied; 0 when `addr` is out of range.
    fn copy_from_payload(&self, addr: u64, out: &mut [u8]) -> usize;

    /// Drop privilege and jump to the payload entry point. On hardware this
    /// does not return; the monitor regains control only through its
    /// exception vectors.
    fn enter_payload(&mut self, entry: u64, argument: u64);

    /// Jump to the internal idle stub (`wfi` loop) used by the sentinel
    /// start command. Does not return on hardware.
    fn enter_idle_stub(&mut self);

    /// Route a peripheral interrupt to the payload at the given priority.
    fn configure_interrupt(&mut self, irq: u64, priority: u64);

    fn enable_interrupt(&mut self, irq: u64);

    fn disable_interrupt(&mut self, irq: u64);
}
