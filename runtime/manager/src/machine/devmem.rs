//! `/dev/mem` machine: the production implementation
//!
//! Maps each supervised domain's 32 MiB region plus the platform control
//! windows (reset controller, APU configuration, GIC distributor) and
//! drives the cores through them. Addresses are those of the reference
//! board (ZynqMP-class quad A53).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use domctl_protocol::{DomainIndex, IpcBlock, ManagerSide, MemoryLayout};

use crate::{DomainError, Result};

/// Reset controller: RST_FPD_APU, one reset bit per core in [0..3].
const RST_FPD_APU: u64 = 0xFD1A_0104;
/// APU configuration block; RVBARADDR{n}L/H pairs start here.
const APU_RVBAR_BASE: u64 = 0xFD5C_0040;
/// GIC distributor; SGIR is at offset 0xF00.
const GICD_SGIR: u64 = 0xF901_0F00;

/// SGI number the monitor listens on for restarts. Must stay in step with
/// the monitor's doorbell configuration.
const RESTART_DOORBELL_SGI: u32 = 14;

/// Control window large enough for any single register access.
const CTRL_WINDOW_SIZE: usize = 0x1000;

struct MappedWindow {
    ptr: *mut u8,
    len: usize,
    phys_base: u64,
}

// Windows are only accessed behind &self/&mut self of the machine.
unsafe impl Send for MappedWindow {}

impl MappedWindow {
    fn map(file: &File, phys_base: u64, len: usize) -> Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                phys_base as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(DomainError::Io(std::io::Error::last_os_error()));
        }
        Ok(Self {
            ptr: ptr.cast(),
            len,
            phys_base,
        })
    }

    fn contains(&self, addr: u64, size: usize) -> bool {
        addr >= self.phys_base && addr + size as u64 <= self.phys_base + self.len as u64
    }

    fn at(&self, addr: u64) -> *mut u8 {
        debug_assert!(self.contains(addr, 1));
        unsafe { self.ptr.add((addr - self.phys_base) as usize) }
    }

    fn read_u32(&self, addr: u64) -> u32 {
        unsafe { std::ptr::read_volatile(self.at(addr).cast::<u32>()) }
    }

    fn write_u32(&self, addr: u64, value: u32) {
        unsafe { std::ptr::write_volatile(self.at(addr).cast::<u32>(), value) }
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}

/// The real machine, over `/dev/mem`.
pub struct DevMemMachine {
    _file: File,
    domains: Vec<(DomainIndex, MappedWindow)>,
    reset_ctrl: MappedWindow,
    apu: MappedWindow,
    gicd: MappedWindow,
    timer_frequency: u32,
}

impl DevMemMachine {
    /// Map every supervised domain plus the control windows.
    ///
    /// Requires `CAP_SYS_RAWIO` (or root) and a kernel without
    /// `CONFIG_STRICT_DEVMEM` restrictions on these ranges.
    pub fn open(timer_frequency: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")?;

        let mut domains = Vec::new();
        for index in DomainIndex::ALL {
            let layout = MemoryLayout::for_domain(index);
            let len = (layout.payload.end() - layout.monitor_code.base) as usize;
            domains.push((
                index,
                MappedWindow::map(&file, layout.monitor_code.base, len)?,
            ));
        }

        let reset_ctrl = MappedWindow::map(&file, RST_FPD_APU & !0xFFF, CTRL_WINDOW_SIZE)?;
        let apu = MappedWindow::map(&file, APU_RVBAR_BASE & !0xFFF, CTRL_WINDOW_SIZE)?;
        let gicd = MappedWindow::map(&file, GICD_SGIR & !0xFFF, CTRL_WINDOW_SIZE)?;

        Ok(Self {
            _file: file,
            domains,
            reset_ctrl,
            apu,
            gicd,
            timer_frequency,
        })
    }

    fn domain_window(&self, addr: u64, size: usize) -> Result<&MappedWindow> {
        self.domains
            .iter()
            .map(|(_, window)| window)
            .find(|window| window.contains(addr, size))
            .ok_or(DomainError::BadPhysRange { addr, size })
    }
}

impl super::Machine for DevMemMachine {
    fn ipc_block(&self, index: DomainIndex) -> Result<ManagerSide> {
        let layout = MemoryLayout::for_domain(index);
        let window = self.domain_window(layout.monitor_ipc.base, layout.monitor_ipc.size)?;
        let block = window.at(layout.monitor_ipc.base).cast::<IpcBlock>();
        Ok(unsafe { ManagerSide::new(block) })
    }

    fn write_phys(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let window = self.domain_window(addr, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), window.at(addr), data.len());
        }
        Ok(())
    }

    fn read_phys(&self, addr: u64, out: &mut [u8]) -> Result<()> {
        let window = self.domain_window(addr, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(window.at(addr), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    fn core_in_reset(&self, index: DomainIndex) -> Result<bool> {
        let reset = self.reset_ctrl.read_u32(RST_FPD_APU);
        Ok(reset & (1 << index.cpu_index()) != 0)
    }

    fn release_core(&mut self, index: DomainIndex, entry: u64) -> Result<()> {
        let cpu = index.cpu_index() as u64;

        // Reset vector first, then drop the reset bit.
        self.apu.write_u32(APU_RVBAR_BASE + cpu * 8, entry as u32);
        self.apu
            .write_u32(APU_RVBAR_BASE + cpu * 8 + 4, (entry >> 32) as u32);

        let reset = self.reset_ctrl.read_u32(RST_FPD_APU);
        self.reset_ctrl
            .write_u32(RST_FPD_APU, reset & !(1 << index.cpu_index()));
        Ok(())
    }

    fn ring_restart_doorbell(&mut self, index: DomainIndex) -> Result<()> {
        // Targeted SGI: CPU target list in [23:16], interrupt id in [3:0].
        let target = 1u32 << (16 + index.cpu_index());
        self.gicd.write_u32(GICD_SGIR, target | RESTART_DOORBELL_SGI);
        Ok(())
    }

    fn timer_frequency(&self) -> u32 {
        self.timer_frequency
    }
}
