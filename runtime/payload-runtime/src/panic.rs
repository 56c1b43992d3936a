//! Panic-to-crash bridge (feature `panic-handler`)

use core::panic::PanicInfo;

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    // The fault pc is unknown from here; the monitor's snapshot of the
    // calling registers carries the useful part.
    crate::rt::notify_crashed(c"rust panic", 0)
}
