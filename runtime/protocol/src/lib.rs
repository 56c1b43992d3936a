//! Shared protocol between the domctl manager and the bare-metal monitor
//!
//! # Purpose
//! Defines the bit-exact shared-memory contract through which a hosted
//! manager process and a freestanding monitor running on another CPU core
//! coordinate: the protocol block itself, the domain lifecycle vocabulary,
//! the payload image header, and the register snapshot captured on a crash.
//!
//! # Integration Points
//! - Depends on: nothing at run time (pure data contract)
//! - Provides to: `domctl-monitor` (executor side), `domctl-manager`
//!   (manager side), `domctl-payload-rt` (SMC call numbers, image header)
//!
//! # Architecture
//! The protocol block is two single-writer/single-reader mailboxes living at
//! a fixed physical address. Each party gets a typed view (`ManagerSide` /
//! `ExecutorSide`) that exposes only the fields that party is allowed to
//! write, performs volatile accesses, and issues a store-ordering barrier
//! before every visible state/ack/seq update. There is no serialization:
//! both sides read and write the block in place as native machine words.

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod block;
pub mod image;
pub mod layout;
pub mod regs;
pub mod smc;
pub mod state;

pub use block::{
    store_barrier, ExecutorSide, ExecutorToManager, IpcBlock, ManagerSide, ManagerToExecutor,
    StartPayloadArgs, FAULT_DESC_LEN, STDOUT_BUFFER_SIZE,
};
pub use image::{PayloadImageHeader, IMAGE_MAGIC, PAYLOAD_IMAGE_HEADER_SIZE};
pub use layout::{
    DomainIndex, MemoryLayout, Region, DUMMY_PAYLOAD_ENTRY, MONITOR_CODE_COOKIE,
    MONITOR_CODE_SIZE, MONITOR_IPC_SIZE, PAYLOAD_MAX_SIZE,
};
pub use regs::{Aarch64FpRegs, Aarch64Regs};
pub use state::{Command, DomainState, ReportedState, Response};

/// CRC-32 as used for payload integrity (same polynomial as zlib's `crc32`).
pub fn crc32(data: &[u8]) -> u32 {
    const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    CRC.checksum(data)
}
