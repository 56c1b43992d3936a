//! Domain lifecycle vocabulary shared by both sides of the protocol

use core::fmt;

/// Lifecycle state of an executor domain, as reported through the protocol
/// block.
///
/// The raw ordinal is only meaningful once the monitor has actually been
/// installed; before that the manager synthesizes `InReset`/`Unavailable`
/// from its own out-of-band probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DomainState {
    /// Core is held in reset; nothing is running.
    InReset = 0,
    /// Monitor is up and waiting for commands.
    MonitorReady = 1,
    /// A start command was accepted; the payload has not yet reported in.
    StartingPayload = 2,
    /// Payload reported itself started and owns the core.
    RunningPayload = 3,
    /// Payload faulted; forensic state is frozen in the block.
    CrashedPayload = 4,
    /// The monitor itself faulted. Terminal; only a power/reset cycle
    /// recovers the domain.
    CrashedMonitor = 5,
    /// Core is running something that is not ours.
    Unavailable = 6,
    /// The reported ordinal was out of range (protocol desync).
    InvalidState = 7,
}

/// Result of decoding a raw state ordinal read from the block.
///
/// Desync is surfaced as `Unrecognized` rather than silently clamped, so it
/// stays observable in tests; API layers decide how to degrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedState {
    Known(DomainState),
    Unrecognized(u32),
}

impl DomainState {
    /// Checked conversion from the raw ordinal stored in the block.
    pub fn from_raw(raw: u32) -> ReportedState {
        match raw {
            0 => ReportedState::Known(DomainState::InReset),
            1 => ReportedState::Known(DomainState::MonitorReady),
            2 => ReportedState::Known(DomainState::StartingPayload),
            3 => ReportedState::Known(DomainState::RunningPayload),
            4 => ReportedState::Known(DomainState::CrashedPayload),
            5 => ReportedState::Known(DomainState::CrashedMonitor),
            6 => ReportedState::Known(DomainState::Unavailable),
            7 => ReportedState::Known(DomainState::InvalidState),
            other => ReportedState::Unrecognized(other),
        }
    }

    /// True for the states in which a payload owns (or owned) the core.
    pub fn is_payload_state(self) -> bool {
        matches!(
            self,
            DomainState::StartingPayload
                | DomainState::RunningPayload
                | DomainState::CrashedPayload
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DomainState::InReset => "in_reset",
            DomainState::MonitorReady => "monitor_ready",
            DomainState::StartingPayload => "starting_payload",
            DomainState::RunningPayload => "running_payload",
            DomainState::CrashedPayload => "crashed_payload",
            DomainState::CrashedMonitor => "crashed_monitor",
            DomainState::Unavailable => "unavailable",
            DomainState::InvalidState => "invalid_state",
        }
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command word written by the manager.
///
/// The channel is half-duplex: the manager must not advance `cmd_seq` again
/// until the executor has mirrored the previous value into `cmd_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Noop = 0,
    StartPayload = 1,
}

impl Command {
    pub fn from_raw(raw: u32) -> Option<Command> {
        match raw {
            0 => Some(Command::Noop),
            1 => Some(Command::StartPayload),
            _ => None,
        }
    }
}

/// Executor's verdict on the most recent `StartPayload` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Response {
    CrcOk = 0,
    CrcMismatched = 1,
    ImageMalformed = 2,
    AbiIncompatible = 3,
}

impl Response {
    pub fn from_raw(raw: u32) -> Option<Response> {
        match raw {
            0 => Some(Response::CrcOk),
            1 => Some(Response::CrcMismatched),
            2 => Some(Response::ImageMalformed),
            3 => Some(Response::AbiIncompatible),
            _ => None,
        }
    }
}
