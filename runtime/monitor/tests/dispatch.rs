//! Dispatch engine behavior over the mock platform

use domctl_monitor::mock::{EnteredTarget, MockPlatform};
use domctl_monitor::smc::{handle_smc, SmcOutcome};
use domctl_monitor::{Monitor, Step};

use domctl_protocol::smc::{ABI_VERSION, GET_ABI_VERSION, GIC_IRQ_CONFIGURE, NOTIFY_PAYLOAD_STARTED, WRITE_STDOUT};
use domctl_protocol::{
    crc32, Command, DomainIndex, DomainState, ExecutorSide, IpcBlock, ManagerSide, MemoryLayout,
    PayloadImageHeader, ReportedState, Response, StartPayloadArgs, DUMMY_PAYLOAD_ENTRY,
};

/// One simulated domain: a flat buffer standing in for the whole region,
/// plus both protocol views and a monitor over the mock platform.
struct Sim {
    _mem: Box<[u8]>,
    manager: ManagerSide,
    monitor: Monitor<MockPlatform>,
    layout: MemoryLayout,
}

fn sim() -> Sim {
    let _ = env_logger::builder().is_test(true).try_init();

    let layout = MemoryLayout::for_domain(DomainIndex::Cpu1);
    let total = (layout.payload.end() - layout.monitor_code.base) as usize;
    let mut mem = vec![0u8; total].into_boxed_slice();

    let block_offset = (layout.monitor_ipc.base - layout.monitor_code.base) as usize;
    let block = unsafe { mem.as_mut_ptr().add(block_offset) }.cast::<IpcBlock>();

    let manager = unsafe { ManagerSide::new(block) };
    let executor = unsafe { ExecutorSide::new(block) };
    let platform = unsafe { MockPlatform::new(mem.as_mut_ptr(), layout) };

    Sim {
        _mem: mem,
        manager,
        monitor: Monitor::new(executor, platform, layout),
        layout,
    }
}

impl Sim {
    /// Write a well-formed payload image at the start of the payload region
    /// and return the matching start arguments.
    fn place_payload(&mut self, body: &[u8]) -> StartPayloadArgs {
        let entry = self.layout.payload.base;
        let header = PayloadImageHeader::new(
            *b"\x02\x00\x00\x14\0\0\0\0",
            ABI_VERSION.major,
            ABI_VERSION.minor,
            entry,
            body.len() as u64,
        );

        let mut image = header.to_bytes().to_vec();
        image.extend_from_slice(body);

        let offset = (entry - self.layout.monitor_code.base) as usize;
        self._mem[offset..offset + image.len()].copy_from_slice(&image);

        StartPayloadArgs {
            entry_address: entry,
            size: image.len() as u64,
            crc: crc32(&image),
            argument: 0x1234,
        }
    }
}

#[test]
fn boot_announces_readiness() {
    let mut sim = sim();
    sim.manager.set_cntfrq(100_000_000);

    sim.monitor.start();

    assert_eq!(
        sim.manager.reported_state(),
        ReportedState::Known(DomainState::MonitorReady)
    );
    assert_eq!(
        sim.monitor.platform_mut().timer_frequency,
        Some(100_000_000)
    );
    assert!(sim.monitor.platform_mut().interrupts_ready);
}

#[test]
fn idle_when_no_command_pending() {
    let mut sim = sim();
    sim.monitor.start();
    assert_eq!(sim.monitor.poll_once(), Step::Idle);
}

#[test]
fn noop_handshake_completes() {
    let mut sim = sim();
    sim.monitor.start();

    sim.manager.send_noop();
    assert!(!sim.manager.command_acknowledged());

    assert_eq!(sim.monitor.poll_once(), Step::Acked(Command::Noop));
    assert!(sim.manager.command_acknowledged());
    assert_eq!(sim.monitor.poll_once(), Step::Idle);
}

#[test]
fn valid_payload_is_entered() {
    let mut sim = sim();
    sim.monitor.start();

    let args = sim.place_payload(&[0x5A; 100]);
    sim.manager.send_start_payload(args);

    assert_eq!(
        sim.monitor.poll_once(),
        Step::EnteredPayload {
            entry: args.entry_address,
            argument: 0x1234
        }
    );
    assert!(sim.manager.command_acknowledged());
    assert_eq!(sim.manager.cmd_resp(), Some(Response::CrcOk));
    assert_eq!(
        sim.monitor.platform_mut().take_entered(),
        Some(EnteredTarget::Payload {
            entry: args.entry_address,
            argument: 0x1234
        })
    );
    // The payload has not reported in yet.
    assert_eq!(
        sim.manager.reported_state(),
        ReportedState::Known(DomainState::StartingPayload)
    );
}

#[test]
fn payload_range_is_synced_before_validation() {
    let mut sim = sim();
    sim.monitor.start();

    let args = sim.place_payload(&[1, 2, 3]);
    sim.manager.send_start_payload(args);
    sim.monitor.poll_once();

    assert_eq!(
        sim.monitor.platform_mut().synced_ranges,
        vec![(args.entry_address, args.size as usize)]
    );
}

#[test]
fn corrupt_payload_is_rejected_and_monitor_stays_ready() {
    let mut sim = sim();
    sim.monitor.start();

    let mut args = sim.place_payload(&[0x5A; 100]);
    args.crc ^= 0xFFFF_FFFF;
    sim.manager.send_start_payload(args);

    assert_eq!(
        sim.monitor.poll_once(),
        Step::Acked(Command::StartPayload)
    );
    assert!(sim.manager.command_acknowledged());
    assert_eq!(sim.manager.cmd_resp(), Some(Response::CrcMismatched));
    assert_eq!(
        sim.manager.reported_state(),
        ReportedState::Known(DomainState::MonitorReady)
    );
    assert_eq!(sim.monitor.platform_mut().take_entered(), None);
}

#[test]
fn out_of_region_payload_is_malformed() {
    let mut sim = sim();
    sim.monitor.start();

    let args = StartPayloadArgs {
        entry_address: sim.layout.payload.end() - 16,
        size: 64,
        crc: 0,
        argument: 0,
    };
    sim.manager.send_start_payload(args);

    sim.monitor.poll_once();
    assert_eq!(sim.manager.cmd_resp(), Some(Response::ImageMalformed));
}

#[test]
fn sentinel_start_parks_without_acknowledging() {
    let mut sim = sim();
    sim.monitor.start();

    sim.manager.send_start_payload(StartPayloadArgs {
        entry_address: DUMMY_PAYLOAD_ENTRY,
        size: 0,
        crc: 0,
        argument: 0,
    });

    assert_eq!(sim.monitor.poll_once(), Step::EnteredIdleStub);
    // Deliberately unacknowledged; the manager's start call times out.
    assert!(!sim.manager.command_acknowledged());
    assert_eq!(
        sim.monitor.platform_mut().take_entered(),
        Some(EnteredTarget::IdleStub)
    );
    assert_eq!(
        sim.manager.reported_state(),
        ReportedState::Known(DomainState::StartingPayload)
    );
}

#[test]
fn unknown_command_word_is_acknowledged() {
    let mut sim = sim();
    sim.monitor.start();

    // A raw command word from a newer manager revision.
    sim.manager.send_noop();
    sim.monitor.poll_once();

    // Forge an out-of-range word directly, then bump the sequence.
    sim.manager.send_noop();
    let block = unsafe {
        &mut *(sim._mem.as_mut_ptr().add(
            (sim.layout.monitor_ipc.base - sim.layout.monitor_code.base) as usize,
        ) as *mut IpcBlock)
    };
    block.manager_to_executor.cmd = 0x77;

    assert_eq!(sim.monitor.poll_once(), Step::AckedUnknown(0x77));
    assert!(sim.manager.command_acknowledged());
}

#[test]
fn started_notification_flips_state() {
    let mut sim = sim();
    sim.monitor.start();

    let executor = *sim.monitor.executor();
    let outcome = handle_smc(
        &executor,
        sim.monitor.platform_mut(),
        NOTIFY_PAYLOAD_STARTED,
        [0; 3],
    );

    assert_eq!(outcome, SmcOutcome::Return(0));
    assert_eq!(
        sim.manager.reported_state(),
        ReportedState::Known(DomainState::RunningPayload)
    );
}

#[test]
fn stdout_smc_copies_from_payload_memory() {
    let mut sim = sim();
    sim.monitor.start();

    let text = b"hello from the payload\n";
    let addr = sim.layout.payload.base + 0x1000;
    let offset = (addr - sim.layout.monitor_code.base) as usize;
    sim._mem[offset..offset + text.len()].copy_from_slice(text);

    let executor = *sim.monitor.executor();
    let outcome = handle_smc(
        &executor,
        sim.monitor.platform_mut(),
        WRITE_STDOUT,
        [addr, text.len() as u64, 0],
    );
    assert_eq!(outcome, SmcOutcome::Return(text.len() as u64));

    let mut out = Vec::new();
    while let Some(byte) = sim.manager.pop_stdout() {
        out.push(byte);
    }
    assert_eq!(out, text);
}

#[test]
fn abi_version_smc_reports_the_monitor_abi() {
    let mut sim = sim();
    let executor = *sim.monitor.executor();
    assert_eq!(
        handle_smc(&executor, sim.monitor.platform_mut(), GET_ABI_VERSION, [0; 3]),
        SmcOutcome::Return(ABI_VERSION.to_packed())
    );
}

#[test]
fn reserved_irq_priority_is_refused() {
    let mut sim = sim();
    let executor = *sim.monitor.executor();

    // Priority 0x10 is in the monitor's reserved band.
    assert_eq!(
        handle_smc(
            &executor,
            sim.monitor.platform_mut(),
            GIC_IRQ_CONFIGURE,
            [121, 0x10, 0]
        ),
        SmcOutcome::Return(1)
    );
    assert!(sim.monitor.platform_mut().configured_irqs.is_empty());

    assert_eq!(
        handle_smc(
            &executor,
            sim.monitor.platform_mut(),
            GIC_IRQ_CONFIGURE,
            [121, 0xA0, 0]
        ),
        SmcOutcome::Return(0)
    );
    assert_eq!(sim.monitor.platform_mut().configured_irqs, vec![(121, 0xA0)]);
}

#[test]
fn unknown_smc_is_flagged_as_monitor_corruption() {
    let mut sim = sim();
    let executor = *sim.monitor.executor();
    assert_eq!(
        handle_smc(&executor, sim.monitor.platform_mut(), 0xF200_FFFF, [0; 3]),
        SmcOutcome::UnknownCall
    );
}
