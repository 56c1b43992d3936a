//! Payload image validation
//!
//! Performed once, between accepting a `StartPayload` command and jumping
//! into the image. Checks run in a fixed order and the first failure wins:
//! integrity (CRC-32) before structure (header magic) before compatibility
//! (ABI version). An image that fails any check is never entered.

use domctl_protocol::smc::{AbiVersion, ABI_VERSION};
use domctl_protocol::{crc32, PayloadImageHeader, Response, StartPayloadArgs, IMAGE_MAGIC};

/// Validate a candidate image against the arguments of the start command.
///
/// `image` is the exact byte range the manager claims to have written;
/// callers resolve it (and reject out-of-region ranges) before calling.
pub fn validate_payload(image: &[u8], args: &StartPayloadArgs) -> Response {
    let computed = crc32(image);
    if computed != args.crc {
        log::error!(
            "payload rejected: crc {computed:#010x}, manager claims {:#010x}",
            args.crc
        );
        return Response::CrcMismatched;
    }

    let header = match PayloadImageHeader::from_bytes(image) {
        Some(header) => header,
        None => {
            log::error!("payload rejected: image too short for a header");
            return Response::ImageMalformed;
        }
    };

    if header.magic != IMAGE_MAGIC {
        log::error!(
            "payload rejected: bad magic {:#010x}, want {IMAGE_MAGIC:#010x}",
            header.magic
        );
        return Response::ImageMalformed;
    }

    let wanted = AbiVersion {
        major: header.abi_major,
        minor: header.abi_minor,
    };
    if !wanted.compatible_with(ABI_VERSION) {
        log::error!(
            "payload rejected: built for ABI {}.{}, monitor implements {}.{}",
            wanted.major,
            wanted.minor,
            ABI_VERSION.major,
            ABI_VERSION.minor
        );
        return Response::AbiIncompatible;
    }

    Response::CrcOk
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn well_formed_image() -> Vec<u8> {
        let header = PayloadImageHeader::new(
            *b"\x02\x00\x00\x14\0\0\0\0",
            ABI_VERSION.major,
            ABI_VERSION.minor,
            0x7802_0000,
            64,
        );
        let mut image = header.to_bytes().to_vec();
        image.extend_from_slice(&[0xA5; 32]);
        image
    }

    fn args_for(image: &[u8]) -> StartPayloadArgs {
        StartPayloadArgs {
            entry_address: 0x7802_0000,
            size: image.len() as u64,
            crc: crc32(image),
            argument: 0,
        }
    }

    #[test]
    fn accepts_a_well_formed_image() {
        let image = well_formed_image();
        let args = args_for(&image);
        assert_eq!(validate_payload(&image, &args), Response::CrcOk);
    }

    #[test]
    fn integrity_failure_wins_over_everything() {
        // Garbage that would also fail the header checks, but with a wrong
        // CRC the verdict must be CrcMismatched.
        let image = [0xFFu8; 64];
        let mut args = args_for(&image);
        args.crc ^= 1;
        assert_eq!(validate_payload(&image, &args), Response::CrcMismatched);
    }

    #[test]
    fn rejects_truncated_image() {
        let image = [0u8; 16];
        let args = args_for(&image);
        assert_eq!(validate_payload(&image, &args), Response::ImageMalformed);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut image = well_formed_image();
        image[8] ^= 0xFF;
        let args = args_for(&image);
        assert_eq!(validate_payload(&image, &args), Response::ImageMalformed);
    }

    #[test]
    fn rejects_newer_minor_and_any_other_major() {
        for (major, minor) in [
            (ABI_VERSION.major, ABI_VERSION.minor + 1),
            (ABI_VERSION.major + 1, 0),
            (ABI_VERSION.major.wrapping_sub(1), ABI_VERSION.minor),
        ] {
            let mut image = well_formed_image();
            image[12] = major;
            image[13] = minor;
            let args = args_for(&image);
            assert_eq!(validate_payload(&image, &args), Response::AbiIncompatible);
        }
    }

    #[test]
    fn accepts_older_minor() {
        let mut image = well_formed_image();
        image[13] = 0;
        let args = args_for(&image);
        assert_eq!(validate_payload(&image, &args), Response::CrcOk);
    }
}
