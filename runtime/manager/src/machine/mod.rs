//! Machine access seam
//!
//! Everything the domain state machine needs from the platform, behind one
//! trait: physical memory windows into the domain's regions, core reset
//! control, and the restart doorbell. The `/dev/mem` implementation drives
//! real hardware; the mock implementation (feature `mock`) simulates the
//! executor core on a thread and is what the tests run against.

use domctl_protocol::{DomainIndex, ManagerSide};

use crate::Result;

pub mod devmem;

#[cfg(feature = "mock")]
pub mod mock;

pub use devmem::DevMemMachine;

#[cfg(feature = "mock")]
pub use mock::MockMachine;

pub trait Machine {
    /// Typed manager view of the domain's protocol block. The mapping
    /// stays valid for the life of the machine.
    fn ipc_block(&self, index: DomainIndex) -> Result<ManagerSide>;

    /// Copy into the domain's physical memory. The range must lie inside
    /// one of the domain's regions.
    fn write_phys(&mut self, addr: u64, data: &[u8]) -> Result<()>;

    /// Copy out of the domain's physical memory.
    fn read_phys(&self, addr: u64, out: &mut [u8]) -> Result<()>;

    fn read_phys_u32(&self, addr: u64) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_phys(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn write_phys_u32(&mut self, addr: u64, value: u32) -> Result<()> {
        self.write_phys(addr, &value.to_le_bytes())
    }

    /// True while the domain's core is still held in reset.
    fn core_in_reset(&self, index: DomainIndex) -> Result<bool>;

    /// Point the core's reset vector at `entry` and release it from reset.
    fn release_core(&mut self, index: DomainIndex, entry: u64) -> Result<()>;

    /// Raise the monitor's restart doorbell interrupt.
    fn ring_restart_doorbell(&mut self, index: DomainIndex) -> Result<()>;

    /// Generic Timer frequency the domain should be seeded with.
    fn timer_frequency(&self) -> u32;
}
