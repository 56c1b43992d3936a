//! Hosted manager for supervised bare-metal domains
//!
//! # Purpose
//! Runs as an ordinary Linux process and takes full ownership of the
//! platform's unmanaged CPU cores: installs the monitor onto a core held in
//! reset, loads and starts payloads there, streams their output, restarts
//! them after a crash, and extracts forensic core dumps.
//!
//! # Integration Points
//! - Depends on: `domctl-protocol` (the shared block contract),
//!   `domctl-monitor` (mock executor, tests only)
//! - Provides to: embedding applications; one [`Domain`] per supervised core
//!
//! # Architecture
//! All machine access goes through the [`machine::Machine`] trait: physical
//! memory windows, core reset control and the restart doorbell. Production
//! uses the `/dev/mem` implementation; tests use a simulated machine that
//! runs the real monitor dispatch engine on a thread. `Domain` itself is
//! the state machine and never touches the hardware directly.

pub mod config;
pub mod console;
pub mod coredump;
pub mod domain;
pub mod machine;

pub use config::{ManagerConfig, PollOverrides};
pub use domain::{CrashInfo, DebugDumpFlags, Domain, DomainGeneralState, PollPolicy};

use std::time::Duration;

use domctl_protocol::{DomainState, Response};
use thiserror::Error;

/// Everything that can go wrong while driving a domain.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation requires {required}, but the domain is {actual}")]
    InappropriateState {
        actual: DomainState,
        required: &'static str,
    },

    #[error("protocol block reports unrecognized state {0:#x}")]
    UnrecognizedState(u32),

    #[error("timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        timeout: Duration,
    },

    #[error("payload crashed before reporting startup")]
    PayloadCrashedDuringStartup,

    #[error("monitor rejected the payload: {0:?}")]
    PayloadRejected(Response),

    #[error("image of {size} bytes does not fit the {limit} byte region")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("no monitor is installed on this domain")]
    MonitorNotInstalled,

    #[error("domain is unavailable: the core is running foreign code")]
    DomainUnavailable,

    #[error("physical range {addr:#x}+{size:#x} is outside the domain")]
    BadPhysRange { addr: u64, size: usize },

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, DomainError>;
