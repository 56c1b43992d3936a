//! Image header emission
//!
//! The monitor refuses any image that does not open with a well-formed
//! header, so every payload crate places one at the very start of its
//! binary. The 8-byte thunk is a single `b` instruction (little-endian
//! `0x14000008`: branch 8 words forward, over the 32-byte header) followed
//! by padding.

use domctl_protocol::{PayloadImageHeader, PAYLOAD_IMAGE_HEADER_SIZE};

/// `b .+0x20` and four bytes of padding: jumps from offset 0 over the
/// header to the code that follows it.
pub const PAYLOAD_HEADER_THUNK: [u8; 8] = [0x08, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00];

/// Build the header for a payload of the given size loading at `base`.
pub const fn payload_header(base: u64, program_size: u64) -> PayloadImageHeader {
    PayloadImageHeader::new(
        PAYLOAD_HEADER_THUNK,
        domctl_protocol::smc::ABI_VERSION.major,
        domctl_protocol::smc::ABI_VERSION.minor,
        base,
        program_size,
    )
}

/// Emit the image header and entry glue for a payload crate.
///
/// `$main` must be a `fn(u64) -> !` receiving the start argument the
/// manager supplied. The glue reports startup to the monitor before
/// calling it, so the manager's start call completes as soon as the
/// payload is genuinely alive.
#[macro_export]
macro_rules! declare_payload {
    ($main:path) => {
        #[link_section = ".payload_header"]
        #[no_mangle]
        #[used]
        pub static PAYLOAD_IMAGE_HEADER: [u8; $crate::header::HEADER_SIZE] =
            $crate::header::payload_header_bytes();

        #[no_mangle]
        pub extern "C" fn payload_entry(argument: u64) -> ! {
            $crate::rt::notify_started();
            let main: fn(u64) -> ! = $main;
            main(argument)
        }
    };
}

/// Size of the emitted header, re-exported for the macro.
pub const HEADER_SIZE: usize = PAYLOAD_IMAGE_HEADER_SIZE;

/// Header bytes with the load address and size left for the image
/// packaging step to patch; the linker knows them, the compiler does not.
pub const fn payload_header_bytes() -> [u8; PAYLOAD_IMAGE_HEADER_SIZE] {
    let header = payload_header(0, 0);
    let mut out = [0u8; PAYLOAD_IMAGE_HEADER_SIZE];

    let mut i = 0;
    while i < 8 {
        out[i] = header.thunk[i];
        i += 1;
    }

    let magic = header.magic.to_le_bytes();
    let mut i = 0;
    while i < 4 {
        out[8 + i] = magic[i];
        i += 1;
    }

    out[12] = header.abi_major;
    out[13] = header.abi_minor;

    let load_address = header.load_address.to_le_bytes();
    let program_size = header.program_size.to_le_bytes();
    let mut i = 0;
    while i < 8 {
        out[16 + i] = load_address[i];
        out[24 + i] = program_size[i];
        i += 1;
    }

    out
}
