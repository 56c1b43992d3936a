//! Runtime support for supervised payloads
//!
//! # Purpose
//! The thin layer a payload links against: the image header and entry
//! thunk the monitor validates, safe wrappers over the mediated service
//! calls (`smc`), formatted output into the shared ring, and timer access.
//!
//! # Integration Points
//! - Depends on: `domctl-protocol` (call numbers, image header, ABI)
//! - Provides to: payload binaries built for a supervised core
//!
//! # Architecture
//! A payload is a freestanding ELF converted to a flat binary whose first
//! 32 bytes are the [`PayloadImageHeader`]. The `declare_payload!` macro
//! emits that header, the `_start` thunk it points past, and the glue that
//! reports startup before handing control to the payload's `main`.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod header;

#[cfg(target_arch = "aarch64")]
mod smc;

#[cfg(target_arch = "aarch64")]
pub mod rt;

#[cfg(target_arch = "aarch64")]
pub mod print;

#[cfg(target_arch = "aarch64")]
pub mod timer;

#[cfg(all(target_arch = "aarch64", feature = "panic-handler"))]
mod panic;

pub use domctl_protocol::smc::{AbiVersion, ABI_VERSION};
pub use domctl_protocol::PayloadImageHeader;
pub use header::PAYLOAD_HEADER_THUNK;
