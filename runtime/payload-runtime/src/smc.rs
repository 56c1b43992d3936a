//! Raw `smc` trampoline

/// Issue one mediated service call. Arguments in x1..x3, function number
/// in x0, result back in x0.
#[inline]
pub fn smc_call(function: u64, a1: u64, a2: u64, a3: u64) -> u64 {
    let result: u64;
    unsafe {
        core::arch::asm!(
            "smc #0",
            inout("x0") function => result,
            in("x1") a1,
            in("x2") a2,
            in("x3") a3,
            options(nostack)
        );
    }
    result
}
