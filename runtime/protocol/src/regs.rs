//! Register snapshot structures captured at fault time
//!
//! These must stay byte-identical to the Linux `user_regs_struct` /
//! `user_fpsimd_struct` layouts for AArch64, because the snapshot is copied
//! verbatim into the core-dump notes that debuggers consume.

use static_assertions::const_assert_eq;

/// General-purpose register snapshot. Matches `user_regs_struct`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Aarch64Regs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

/// SIMD/FP register snapshot. Matches `user_fpsimd_struct` (which is padded
/// to a 16-byte multiple by its `__uint128_t` member).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Aarch64FpRegs {
    pub vregs: [u128; 32],
    pub fpsr: u32,
    pub fpcr: u32,
    pub _pad: [u8; 8],
}

const_assert_eq!(core::mem::size_of::<Aarch64Regs>(), 272);
const_assert_eq!(core::mem::size_of::<Aarch64FpRegs>(), 528);

impl Aarch64Regs {
    pub const fn zeroed() -> Self {
        Self {
            regs: [0; 31],
            sp: 0,
            pc: 0,
            pstate: 0,
        }
    }
}

impl Aarch64FpRegs {
    pub const fn zeroed() -> Self {
        Self {
            vregs: [0; 32],
            fpsr: 0,
            fpcr: 0,
            _pad: [0; 8],
        }
    }
}

impl Default for Aarch64Regs {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Default for Aarch64FpRegs {
    fn default() -> Self {
        Self::zeroed()
    }
}
