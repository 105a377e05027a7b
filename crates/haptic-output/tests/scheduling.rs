//! Scheduler threads against in-process transports.

use haptic_output::{
    command_queue, DeviceLink, DeviceSpec, MotorRecord, OutputScheduler, RecordingTransport,
    Result, SchedulerConfig, SchedulerCore, Transport,
};
use haptic_voice::{Command, DeviceId, DriveHint, MotorId};
use std::time::{Duration, Instant};

/// Scheduler logs show up with `--nocapture`.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn drive(device: DeviceId, slot: u8, frequency_hz: f32) -> Command {
    Command {
        motor: MotorId::new(device, slot),
        voice: Some(1),
        frequency_hz,
        amplitude: 1.0,
        hint: DriveHint::Sustain,
    }
}

/// Blocks every write for a fixed time.
struct SlowTransport {
    delay: Duration,
}

struct SlowLink {
    device: DeviceId,
    delay: Duration,
}

impl Transport for SlowTransport {
    fn name(&self) -> &str {
        "slow"
    }

    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn DeviceLink>> {
        Ok(Box::new(SlowLink {
            device: spec.id,
            delay: self.delay,
        }))
    }
}

impl DeviceLink for SlowLink {
    fn device(&self) -> DeviceId {
        self.device
    }

    fn write(&mut self, _frame: &[u8]) -> Result<()> {
        std::thread::sleep(self.delay);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_slow_device_does_not_stall_others() {
    init_logging();
    let fast = DeviceId(0);
    let slow = DeviceId(1);

    let recording = RecordingTransport::new();
    let (mut fast_tx, fast_rx) = command_queue(8);
    let fast_link = recording.open(&DeviceSpec::new(fast, 2)).unwrap();
    let fast_scheduler =
        OutputScheduler::spawn(SchedulerCore::new(fast_link, fast_rx), SchedulerConfig::default())
            .unwrap();

    let slow_transport = SlowTransport {
        delay: Duration::from_millis(500),
    };
    let (mut slow_tx, slow_rx) = command_queue(8);
    let slow_link = slow_transport.open(&DeviceSpec::new(slow, 2)).unwrap();
    let slow_scheduler =
        OutputScheduler::spawn(SchedulerCore::new(slow_link, slow_rx), SchedulerConfig::default())
            .unwrap();

    let started = Instant::now();
    slow_tx.push(drive(slow, 0, 100.0));
    fast_tx.push(drive(fast, 0, 200.0));

    while recording.records(fast).is_empty() {
        assert!(started.elapsed() < Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(started.elapsed() < Duration::from_millis(400));

    drop(fast_tx);
    drop(slow_tx);
    fast_scheduler.shutdown();
    slow_scheduler.shutdown();
}

#[test]
fn test_burst_collapses_to_final_state() {
    init_logging();
    let device = DeviceId(7);
    let recording = RecordingTransport::new();
    let (mut tx, rx) = command_queue(4);
    let link = recording.open(&DeviceSpec::new(device, 2)).unwrap();
    let core = SchedulerCore::new(link, rx);
    let stats = core.stats();

    // Fill past capacity before the thread starts: later commands replace
    // pending ones for the same motor
    for i in 0..10 {
        tx.push(drive(device, (i % 2) as u8, 100.0 + i as f32));
    }
    tx.push(Command::silence(MotorId::new(device, 1)));

    let scheduler = OutputScheduler::spawn(core, SchedulerConfig::default()).unwrap();
    drop(tx);
    scheduler.shutdown();

    let slot0 = recording.last_record(device, 0).unwrap();
    assert!((slot0.frequency_hz().unwrap() - 108.0).abs() < 0.5);
    assert_eq!(recording.last_record(device, 1), Some(MotorRecord::silence(1)));
    assert_eq!(stats.snapshot().frames_written, 1);
}
