//! Executor-side monitor: the supervisor running on an unmanaged core
//!
//! # Purpose
//! Implements the dispatch engine that sits on a supervised CPU core at the
//! highest privilege level: it announces readiness through the protocol
//! block, polls for manager commands, validates and launches payloads,
//! mediates payload service calls, and freezes forensic state when either
//! the payload or the monitor itself faults.
//!
//! # Integration Points
//! - Depends on: `domctl-protocol` (block views, image header, lifecycle
//!   vocabulary)
//! - Provides to: the monitor firmware image (via `arch`, on bare metal)
//!   and the manager's tests (via `mock`, on the host)
//!
//! # Architecture
//! The dispatch engine itself is platform-free: every privileged action
//! (cache maintenance, interrupt plumbing, the final jump into the payload)
//! goes through the [`MonitorPlatform`] trait. On hardware the trait is
//! implemented over EL3 system registers and the GIC; under the `mock`
//! feature it is implemented over a plain host memory buffer, which lets the
//! exact same engine run inside an ordinary test process.

#![no_std]

#[cfg(any(test, feature = "mock"))]
#[macro_use]
extern crate std;

pub mod crash;
pub mod dispatch;
pub mod platform;
pub mod smc;
pub mod validate;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod arch;

pub use crash::CrashingEntity;
pub use dispatch::{Monitor, Step};
pub use platform::MonitorPlatform;
pub use smc::SmcOutcome;
