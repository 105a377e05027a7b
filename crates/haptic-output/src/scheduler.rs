//! Per-device output pacing.
//!
//! Each device gets its own thread that drains the device's command queue,
//! keeps the last command per motor, packs the survivors into frames and
//! writes them. Ticks are spaced at least `min_update_interval` apart, so a
//! burst of note events collapses into a single write.

use crate::error::{Error, Result};
use crate::frame::{encode_frames, MotorRecord};
use crate::queue::CommandConsumer;
use crate::transport::DeviceLink;
use haptic_voice::{Command, DeviceId};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default spacing between writes to one device.
pub const DEFAULT_MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(10);

/// How long an idle scheduler sleeps before re-checking for shutdown.
const IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub min_update_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_update_interval: DEFAULT_MIN_UPDATE_INTERVAL,
        }
    }
}

/// Counters shared between a scheduler thread and its owner.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    commands: AtomicU64,
    coalesced: AtomicU64,
    frames_written: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Commands drained from the queue
    pub commands: u64,
    /// Commands superseded by a later one for the same motor in one tick
    pub coalesced: u64,
    pub frames_written: u64,
    /// Frames dropped because the transport write failed
    pub write_failures: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commands: self.commands.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// The synchronous part of a scheduler: one call to [`tick`](Self::tick)
/// is one pacing step.
pub struct SchedulerCore {
    device: DeviceId,
    link: Box<dyn DeviceLink>,
    consumer: CommandConsumer,
    batch: Vec<Command>,
    stats: Arc<SchedulerStats>,
}

impl SchedulerCore {
    pub fn new(link: Box<dyn DeviceLink>, consumer: CommandConsumer) -> Self {
        Self {
            device: link.device(),
            link,
            consumer,
            batch: Vec::new(),
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Drain, coalesce and write. Returns the number of frames written.
    pub fn tick(&mut self) -> usize {
        self.batch.clear();
        let drained = self.consumer.drain_into(&mut self.batch);
        if drained == 0 {
            return 0;
        }
        self.stats
            .commands
            .fetch_add(drained as u64, Ordering::Relaxed);

        let records = self.coalesce();
        let coalesced = drained - records.len();
        if coalesced > 0 {
            self.stats
                .coalesced
                .fetch_add(coalesced as u64, Ordering::Relaxed);
        }

        let mut written = 0;
        for frame in encode_frames(&records) {
            match self.link.write(&frame) {
                Ok(()) => written += 1,
                Err(e) => {
                    // No resend; the next command for these motors supersedes it
                    warn!(device = %self.device, "Dropping frame: {e}");
                    self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.stats
            .frames_written
            .fetch_add(written as u64, Ordering::Relaxed);
        written
    }

    /// Keep the last command per motor, in first-touched order.
    fn coalesce(&self) -> SmallVec<[MotorRecord; 8]> {
        let mut records: SmallVec<[MotorRecord; 8]> = SmallVec::new();
        for command in &self.batch {
            if command.motor.device != self.device {
                debug!(
                    device = %self.device,
                    motor = %command.motor,
                    "Ignoring command routed to the wrong device"
                );
                continue;
            }
            let record = MotorRecord::from_command(command);
            match records.iter().position(|r| r.slot == record.slot) {
                Some(index) => records[index] = record,
                None => records.push(record),
            }
        }
        records
    }

    fn wait(&mut self, timeout: Duration) -> bool {
        self.consumer.wait(timeout)
    }

    fn is_closed(&self) -> bool {
        self.consumer.is_closed()
    }

    fn close(self) {
        let device = self.device;
        if let Err(e) = self.link.close() {
            warn!(%device, "Failed to close device: {e}");
        }
    }
}

/// A scheduler running on its own thread.
///
/// Stops after its queue producer is dropped (flushing what is left) or
/// when [`shutdown`](Self::shutdown) is called.
pub struct OutputScheduler {
    device: DeviceId,
    stats: Arc<SchedulerStats>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutputScheduler {
    pub fn spawn(core: SchedulerCore, config: SchedulerConfig) -> Result<Self> {
        let device = core.device();
        let stats = core.stats();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(format!("haptic-out-{device}"))
            .spawn(move || Self::run(core, config, stop_clone))
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            device,
            stats,
            stop,
            handle: Some(handle),
        })
    }

    fn run(mut core: SchedulerCore, config: SchedulerConfig, stop: Arc<AtomicBool>) {
        debug!(device = %core.device(), "Output scheduler started");
        let mut last_write: Option<Instant> = None;

        loop {
            if core.wait(IDLE_WAIT) {
                if let Some(last) = last_write {
                    let since = last.elapsed();
                    if since < config.min_update_interval {
                        thread::sleep(config.min_update_interval - since);
                    }
                }
                core.tick();
                last_write = Some(Instant::now());
            }

            if core.is_closed() || stop.load(Ordering::SeqCst) {
                // Flush anything pushed after the last tick
                core.tick();
                break;
            }
        }

        let device = core.device();
        core.close();
        info!(%device, "Output scheduler stopped");
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Flush, close the link and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(device = %self.device, "Output scheduler thread panicked");
            }
        }
    }
}

impl Drop for OutputScheduler {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{command_queue, CommandProducer};
    use crate::transport::{DeviceSpec, RecordingTransport, Transport};
    use haptic_voice::{DriveHint, MotorId};

    const DEV: DeviceId = DeviceId(0);

    fn drive(slot: u8, frequency_hz: f32) -> Command {
        Command {
            motor: MotorId::new(DEV, slot),
            voice: Some(1),
            frequency_hz,
            amplitude: 1.0,
            hint: DriveHint::Sustain,
        }
    }

    fn core() -> (RecordingTransport, CommandProducer, SchedulerCore) {
        let transport = RecordingTransport::new();
        let link = transport.open(&DeviceSpec::new(DEV, 2)).unwrap();
        let (producer, consumer) = command_queue(16);
        (transport, producer, SchedulerCore::new(link, consumer))
    }

    #[test]
    fn test_tick_coalesces_per_motor() {
        let (transport, mut tx, mut core) = core();
        tx.push(drive(0, 100.0));
        tx.push(drive(1, 200.0));
        tx.push(drive(0, 300.0));

        assert_eq!(core.tick(), 1);

        let records = transport.records(DEV);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].slot, 0);
        let hz = records[0].frequency_hz().unwrap();
        assert!((hz - 300.0).abs() < 1.0);

        let stats = core.stats().snapshot();
        assert_eq!(stats.commands, 3);
        assert_eq!(stats.coalesced, 1);
        assert_eq!(stats.frames_written, 1);
    }

    #[test]
    fn test_empty_tick_writes_nothing() {
        let (transport, _tx, mut core) = core();
        assert_eq!(core.tick(), 0);
        assert!(transport.frames(DEV).is_empty());
    }

    #[test]
    fn test_write_failure_drops_frame() {
        let (transport, mut tx, mut core) = core();
        transport.set_fail_writes(DEV, true);
        tx.push(drive(0, 100.0));
        assert_eq!(core.tick(), 0);
        assert_eq!(core.stats().snapshot().write_failures, 1);

        // Nothing is resent once the transport recovers
        transport.set_fail_writes(DEV, false);
        assert_eq!(core.tick(), 0);
        assert!(transport.frames(DEV).is_empty());
    }

    #[test]
    fn test_thread_flushes_on_producer_drop() {
        let (transport, mut tx, core) = core();
        let scheduler = OutputScheduler::spawn(core, SchedulerConfig::default()).unwrap();

        tx.push(drive(0, 100.0));
        tx.push(Command::silence(MotorId::new(DEV, 0)));
        drop(tx);
        scheduler.shutdown();

        assert_eq!(
            transport.last_record(DEV, 0),
            Some(MotorRecord::silence(0))
        );
        assert_eq!(transport.closed(), vec![DEV]);
    }

    #[test]
    fn test_writes_respect_min_interval() {
        let (transport, mut tx, core) = core();
        let config = SchedulerConfig {
            min_update_interval: Duration::from_millis(30),
        };
        let scheduler = OutputScheduler::spawn(core, config).unwrap();

        let started = Instant::now();
        tx.push(drive(0, 100.0));
        std::thread::sleep(Duration::from_millis(5));
        tx.push(drive(1, 200.0));

        while transport.records(DEV).len() < 2 {
            assert!(started.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(1));
        }
        // Either both landed in one tick, or the second waited an interval
        if transport.frames(DEV).len() > 1 {
            assert!(started.elapsed() >= Duration::from_millis(30));
        }

        drop(tx);
        scheduler.shutdown();
    }
}
