//! Per-domain physical memory layout
//!
//! The platform reserves, for every supervised core, three fixed regions:
//! monitor code (with the install cookie in its last word), monitor IPC
//! (hosting the protocol block) and the payload area. Domains are laid out
//! at a fixed stride so the executor can locate its own block from its CPU
//! index alone.

use core::fmt;

/// First supervised domain's region base.
pub const DOMAIN_REGION_BASE: u64 = 0x7800_0000;
/// Distance between consecutive domains' regions.
pub const DOMAIN_REGION_STRIDE: u64 = 0x0200_0000;

pub const MONITOR_CODE_SIZE: usize = 0x1_0000;
pub const MONITOR_IPC_SIZE: usize = 0x1_0000;
/// Code, data, stack, everything.
pub const PAYLOAD_MAX_SIZE: usize = 0x1FE_0000;

/// Placed in the last 4 bytes of the monitor code region by the manager;
/// its presence is the "a monitor has been installed here" heuristic.
pub const MONITOR_CODE_COOKIE: u32 = 0x7150_ABCD;

/// Sentinel entry address: the monitor jumps to an internal idle stub
/// instead of validating, so a debugger can hot-load the real payload.
pub const DUMMY_PAYLOAD_ENTRY: u64 = 0xBAAD_F00D;

/// Identifies one supervised CPU core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DomainIndex {
    Cpu1,
    Cpu2,
    Cpu3,
}

impl DomainIndex {
    /// Hardware CPU number (MPIDR Aff0) for this domain.
    pub fn cpu_index(self) -> usize {
        match self {
            DomainIndex::Cpu1 => 1,
            DomainIndex::Cpu2 => 2,
            DomainIndex::Cpu3 => 3,
        }
    }

    pub const ALL: [DomainIndex; 3] = [DomainIndex::Cpu1, DomainIndex::Cpu2, DomainIndex::Cpu3];
}

impl fmt::Display for DomainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.cpu_index())
    }
}

/// One contiguous physical region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u64,
    pub size: usize,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.base + self.size as u64
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// The three fixed regions of one domain.
#[derive(Debug, Clone, Copy)]
pub struct MemoryLayout {
    pub monitor_code: Region,
    pub monitor_ipc: Region,
    pub payload: Region,
}

impl MemoryLayout {
    /// Layout for the given domain on the reference platform.
    pub fn for_domain(index: DomainIndex) -> Self {
        let base = DOMAIN_REGION_BASE + (index.cpu_index() as u64 - 1) * DOMAIN_REGION_STRIDE;

        Self {
            monitor_code: Region {
                base,
                size: MONITOR_CODE_SIZE,
            },
            monitor_ipc: Region {
                base: base + MONITOR_CODE_SIZE as u64,
                size: MONITOR_IPC_SIZE,
            },
            payload: Region {
                base: base + (MONITOR_CODE_SIZE + MONITOR_IPC_SIZE) as u64,
                size: PAYLOAD_MAX_SIZE,
            },
        }
    }

    /// Physical address of the install cookie.
    pub fn cookie_address(&self) -> u64 {
        self.monitor_code.end() - core::mem::size_of::<u32>() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_contiguous_and_disjoint() {
        for index in DomainIndex::ALL {
            let layout = MemoryLayout::for_domain(index);
            assert_eq!(layout.monitor_code.end(), layout.monitor_ipc.base);
            assert_eq!(layout.monitor_ipc.end(), layout.payload.base);
            assert!(layout.payload.end() - layout.monitor_code.base <= DOMAIN_REGION_STRIDE);
        }
    }

    #[test]
    fn domains_do_not_overlap() {
        let a = MemoryLayout::for_domain(DomainIndex::Cpu1);
        let b = MemoryLayout::for_domain(DomainIndex::Cpu2);
        assert!(a.payload.end() <= b.monitor_code.base);
    }

    #[test]
    fn cookie_sits_in_the_code_region() {
        let layout = MemoryLayout::for_domain(DomainIndex::Cpu1);
        assert!(layout.monitor_code.contains(layout.cookie_address()));
        assert_eq!(layout.cookie_address() % 4, 0);
    }
}
