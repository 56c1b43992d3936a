//! The monitor's command dispatch engine

use domctl_protocol::{
    Command, DomainState, ExecutorSide, MemoryLayout, Response, DUMMY_PAYLOAD_ENTRY,
};

use crate::platform::MonitorPlatform;
use crate::validate::validate_payload;

/// What one polling pass did. Bare metal ignores this (the loop just keeps
/// polling); the mock executor uses it to know when to act as the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No unacknowledged command.
    Idle,
    /// A command was processed and acknowledged without a payload launch.
    Acked(Command),
    /// The command word was not a known command. Acknowledged anyway; a
    /// stuck channel would be worse than a skipped command.
    AckedUnknown(u32),
    /// Sentinel start: the core went to the idle stub, deliberately
    /// without acknowledging.
    EnteredIdleStub,
    /// Validation passed and the core jumped into the payload.
    EnteredPayload { entry: u64, argument: u64 },
}

/// The dispatch engine. Owns the executor view of the protocol block and a
/// platform; generic so the identical engine runs at EL3 and in tests.
pub struct Monitor<P: MonitorPlatform> {
    executor: ExecutorSide,
    platform: P,
    layout: MemoryLayout,
}

impl<P: MonitorPlatform> Monitor<P> {
    pub fn new(executor: ExecutorSide, platform: P, layout: MemoryLayout) -> Self {
        Self {
            executor,
            platform,
            layout,
        }
    }

    pub fn executor(&self) -> &ExecutorSide {
        &self.executor
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// One-time boot work, ending with the readiness announcement the
    /// manager polls for.
    pub fn start(&mut self) {
        let cntfrq = self.executor.cntfrq();
        self.platform.set_timer_frequency(cntfrq);
        self.platform.setup_interrupts();

        log::info!("monitor up, cntfrq {cntfrq} Hz");
        self.executor.set_state(DomainState::MonitorReady);
    }

    /// Process at most one pending command.
    pub fn poll_once(&mut self) -> Step {
        if self.executor.cmd_seq() == self.executor.cmd_ack() {
            return Step::Idle;
        }

        match Command::from_raw(self.executor.cmd_raw()) {
            Some(Command::Noop) => {
                self.executor.ack_command();
                Step::Acked(Command::Noop)
            }
            Some(Command::StartPayload) => self.start_payload(),
            None => {
                let raw = self.executor.cmd_raw();
                log::warn!("unknown command word {raw:#x}, acknowledging");
                self.executor.ack_command();
                Step::AckedUnknown(raw)
            }
        }
    }

    /// The bare-metal main loop. Never returns; on the mock the thread
    /// calls `poll_once` directly instead.
    pub fn run(&mut self) -> ! {
        self.start();
        loop {
            self.poll_once();
            core::hint::spin_loop();
        }
    }

    fn start_payload(&mut self) -> Step {
        let args = self.executor.start_payload_args();
        self.executor.set_state(DomainState::StartingPayload);

        if args.entry_address == DUMMY_PAYLOAD_ENTRY {
            // Debugger hand-off: park in the idle stub so a debugger can
            // place the real payload and move the pc itself. No ack; the
            // manager's start call is expected to time out here.
            log::info!("sentinel start, entering idle stub");
            self.platform.enter_idle_stub();
            return Step::EnteredIdleStub;
        }

        let response = self.validate(&args);
        self.executor.set_cmd_resp(response);
        self.executor.ack_command();

        if response != Response::CrcOk {
            self.executor.set_state(DomainState::MonitorReady);
            return Step::Acked(Command::StartPayload);
        }

        log::info!(
            "entering payload at {:#x} ({} bytes)",
            args.entry_address,
            args.size
        );
        self.platform
            .enter_payload(args.entry_address, args.argument);
        Step::EnteredPayload {
            entry: args.entry_address,
            argument: args.argument,
        }
    }

    fn validate(&mut self, args: &domctl_protocol::StartPayloadArgs) -> Response {
        if !self.layout.payload.contains(args.entry_address)
            || args.size == 0
            || args.size > self.layout.payload.size as u64
            || args.entry_address + args.size > self.layout.payload.end()
        {
            log::error!(
                "payload rejected: range {:#x}+{:#x} outside the payload region",
                args.entry_address,
                args.size
            );
            return Response::ImageMalformed;
        }

        self.platform
            .sync_payload_range(args.entry_address, args.size as usize);

        match self
            .platform
            .image_bytes(args.entry_address, args.size as usize)
        {
            Some(image) => validate_payload(image, args),
            None => Response::ImageMalformed,
        }
    }
}
