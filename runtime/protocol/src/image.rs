//! Payload image header
//!
//! Every payload binary starts with a fixed 32-byte prefix: an 8-byte thunk
//! (the real entry jump), the magic, the ABI version pair, and the intended
//! load address and program size. It is produced by the payload build step
//! and consumed exactly once by the monitor at validation time.

use static_assertions::const_assert_eq;

pub const IMAGE_MAGIC: u32 = 0x6C74_6344; // "Dctl"
pub const PAYLOAD_IMAGE_HEADER_SIZE: usize = 32;

/// Fixed-offset prefix of every payload binary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadImageHeader {
    pub thunk: [u8; 8],
    pub magic: u32,
    pub abi_major: u8,
    pub abi_minor: u8,
    pub _res0: [u8; 2],
    pub load_address: u64,
    pub program_size: u64,
}

const_assert_eq!(
    core::mem::size_of::<PayloadImageHeader>(),
    PAYLOAD_IMAGE_HEADER_SIZE
);

impl PayloadImageHeader {
    pub const fn new(thunk: [u8; 8], abi_major: u8, abi_minor: u8, load_address: u64, program_size: u64) -> Self {
        Self {
            thunk,
            magic: IMAGE_MAGIC,
            abi_major,
            abi_minor,
            _res0: [0; 2],
            load_address,
            program_size,
        }
    }

    /// Decode the header from the start of an image. Returns `None` when the
    /// image is too short to even contain one.
    pub fn from_bytes(image: &[u8]) -> Option<Self> {
        if image.len() < PAYLOAD_IMAGE_HEADER_SIZE {
            return None;
        }

        let mut thunk = [0u8; 8];
        thunk.copy_from_slice(&image[0..8]);

        Some(Self {
            thunk,
            magic: u32::from_le_bytes([image[8], image[9], image[10], image[11]]),
            abi_major: image[12],
            abi_minor: image[13],
            _res0: [image[14], image[15]],
            load_address: u64::from_le_bytes(image[16..24].try_into().ok()?),
            program_size: u64::from_le_bytes(image[24..32].try_into().ok()?),
        })
    }

    /// Encode the header as it appears at the start of an image.
    pub fn to_bytes(&self) -> [u8; PAYLOAD_IMAGE_HEADER_SIZE] {
        let mut out = [0u8; PAYLOAD_IMAGE_HEADER_SIZE];
        out[0..8].copy_from_slice(&self.thunk);
        out[8..12].copy_from_slice(&self.magic.to_le_bytes());
        out[12] = self.abi_major;
        out[13] = self.abi_minor;
        out[14] = self._res0[0];
        out[15] = self._res0[1];
        out[16..24].copy_from_slice(&self.load_address.to_le_bytes());
        out[24..32].copy_from_slice(&self.program_size.to_le_bytes());
        out
    }
}
