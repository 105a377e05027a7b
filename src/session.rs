//! A running synthesizer: allocator state plus one output pipeline per device.
//!
//! All note handling happens under one lock around the registry and the
//! allocator. Commands leave the lock through the per-device queues; the
//! scheduler threads do the actual writes.

use crate::error::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use haptic_midi::{note_name, NoteEvent, NoteEventKind};
use haptic_output::{
    command_queue, CommandProducer, DeviceSpec, OutputScheduler, PushOutcome, SchedulerConfig,
    SchedulerCore, StatsSnapshot, Transport,
};
use haptic_voice::{
    Allocation, AllocatorPolicy, Command, DeviceChange, DeviceId, MotorRegistry, NoteAllocator,
    Voice,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Hot-plug notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Attached(DeviceSpec),
    Detached(DeviceId),
}

/// Sends hot-plug notifications to a session from any thread.
///
/// Notifications are applied before the session handles its next event.
#[derive(Debug, Clone)]
pub struct DeviceNotifier {
    tx: Sender<DeviceEvent>,
}

impl DeviceNotifier {
    pub fn attached(&self, spec: DeviceSpec) {
        let _ = self.tx.send(DeviceEvent::Attached(spec));
    }

    pub fn detached(&self, device: DeviceId) {
        let _ = self.tx.send(DeviceEvent::Detached(device));
    }
}

pub(crate) struct DeviceOutput {
    producer: CommandProducer,
    scheduler: OutputScheduler,
    /// Write failures already accounted for by the dedup state
    seen_failures: u64,
}

impl DeviceOutput {
    pub(crate) fn open(
        transport: &dyn Transport,
        spec: &DeviceSpec,
        config: SchedulerConfig,
        queue_capacity: usize,
    ) -> Result<Self> {
        let link = transport.open(spec)?;
        let (producer, consumer) = command_queue(queue_capacity);
        let scheduler = OutputScheduler::spawn(SchedulerCore::new(link, consumer), config)?;
        Ok(Self {
            producer,
            scheduler,
            seen_failures: 0,
        })
    }

    /// Flush pending commands and close the link.
    fn close(self) {
        let Self {
            producer,
            scheduler,
            ..
        } = self;
        drop(producer);
        scheduler.shutdown();
    }
}

struct SessionState {
    registry: MotorRegistry,
    allocator: Box<dyn NoteAllocator>,
    outputs: BTreeMap<DeviceId, DeviceOutput>,
    /// Reused command buffer
    scratch: Vec<Command>,
}

/// How [`SessionState::dispatch`] treats repeated commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dedup {
    /// Skip commands identical to the motor's last one
    Skip,
    /// Send silences even when the motor is already recorded as silent
    ResendSilence,
}

impl SessionState {
    /// Deduplicate against the last command per motor and enqueue.
    fn dispatch(&mut self, dedup: Dedup) {
        self.forget_failed_writes();
        for command in self.scratch.drain(..) {
            let forced = dedup == Dedup::ResendSilence && command.is_silence();
            let unchanged = !forced
                && self
                    .registry
                    .get(command.motor)
                    .and_then(|m| m.last_sent())
                    .is_some_and(|last| last.same_drive(&command));
            if unchanged {
                continue;
            }
            let Some(output) = self.outputs.get_mut(&command.motor.device) else {
                debug!(motor = %command.motor, "No output for motor, dropping command");
                continue;
            };
            match output.producer.push(command) {
                PushOutcome::Queued | PushOutcome::Replaced => {
                    self.registry.record_sent(&command);
                }
                PushOutcome::Rejected => {}
                PushOutcome::Closed => {
                    warn!(device = %command.motor.device, "Output closed, dropping command");
                }
            }
        }
    }

    /// After a failed write the device may not hold the recorded state, so
    /// the next command for each of its motors must go out.
    fn forget_failed_writes(&mut self) {
        for (device, output) in self.outputs.iter_mut() {
            let failures = output.scheduler.stats().write_failures;
            if failures != output.seen_failures {
                output.seen_failures = failures;
                debug!(%device, failures, "Write failed, clearing sent state");
                self.registry.forget_sent(*device);
            }
        }
    }
}

/// Configuration the session keeps for devices attached later.
pub(crate) struct OutputSettings {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) scheduler: SchedulerConfig,
    pub(crate) queue_capacity: usize,
}

/// A running synthesizer.
///
/// Shared between the event thread and the release clock; every method
/// takes `&self`.
pub struct Session {
    state: Mutex<SessionState>,
    settings: OutputSettings,
    notify_tx: Sender<DeviceEvent>,
    notify_rx: Receiver<DeviceEvent>,
    next_device_id: Mutex<u32>,
}

impl Session {
    pub(crate) fn from_parts(
        registry: MotorRegistry,
        allocator: Box<dyn NoteAllocator>,
        outputs: BTreeMap<DeviceId, DeviceOutput>,
        settings: OutputSettings,
    ) -> Self {
        let (notify_tx, notify_rx) = unbounded();
        let next_device_id = registry.devices().map(|d| d.0 + 1).max().unwrap_or(0);
        Self {
            state: Mutex::new(SessionState {
                registry,
                allocator,
                outputs,
                scratch: Vec::new(),
            }),
            settings,
            notify_tx,
            notify_rx,
            next_device_id: Mutex::new(next_device_id),
        }
    }

    /// Create a session builder
    pub fn builder(transport: Arc<dyn Transport>) -> crate::SessionBuilder {
        crate::SessionBuilder::new(transport)
    }

    pub fn notifier(&self) -> DeviceNotifier {
        DeviceNotifier {
            tx: self.notify_tx.clone(),
        }
    }

    /// A device id not used by any device so far.
    pub fn allocate_device_id(&self) -> DeviceId {
        let mut next = self.next_device_id.lock();
        let id = DeviceId(*next);
        *next += 1;
        id
    }

    pub fn policy(&self) -> AllocatorPolicy {
        self.state.lock().allocator.policy()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.state.lock().registry.devices().collect()
    }

    pub fn total_motor_count(&self) -> usize {
        self.state.lock().registry.total_motor_count()
    }

    pub fn voice_count(&self) -> usize {
        self.state.lock().allocator.voice_count()
    }

    pub fn voices(&self) -> Vec<Voice> {
        self.state.lock().allocator.snapshot()
    }

    pub fn output_stats(&self, device: DeviceId) -> Option<StatsSnapshot> {
        self.state
            .lock()
            .outputs
            .get(&device)
            .map(|o| o.scheduler.stats())
    }

    /// Feed one note event through the allocator.
    ///
    /// Returns the allocation for note-ons, `None` for everything else.
    pub fn handle_event(&self, event: &NoteEvent, now: Instant) -> Option<Allocation> {
        self.apply_device_events();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let channel = event.channel;
        let mut dedup = Dedup::Skip;

        let allocation = match event.kind {
            NoteEventKind::NoteOn { note, velocity } => {
                let allocation = state.allocator.on_note_on(
                    &mut state.registry,
                    note,
                    velocity,
                    channel,
                    now,
                    &mut state.scratch,
                );
                log_allocation(note, channel, &allocation);
                Some(allocation)
            }
            NoteEventKind::NoteOff { note } => {
                debug!(channel, "Note off {}", note_name(note));
                state
                    .allocator
                    .on_note_off(&mut state.registry, note, channel, now, &mut state.scratch);
                None
            }
            NoteEventKind::AllNotesOff | NoteEventKind::Stop => {
                debug!(channel, "Silencing all motors");
                state
                    .allocator
                    .silence_all(&mut state.registry, &mut state.scratch);
                dedup = Dedup::ResendSilence;
                None
            }
            NoteEventKind::ControlChange { controller, value } => {
                debug!(channel, controller, value, "Ignoring control change");
                None
            }
        };

        state.dispatch(dedup);
        allocation
    }

    /// Complete due releases.
    pub fn tick(&self, now: Instant) {
        self.apply_device_events();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state
            .allocator
            .tick(&mut state.registry, now, &mut state.scratch);
        state.dispatch(Dedup::Skip);
    }

    /// Silence every motor and empty the voice table.
    pub fn silence_all(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state
            .allocator
            .silence_all(&mut state.registry, &mut state.scratch);
        state.dispatch(Dedup::ResendSilence);
    }

    /// Open a device and add its motors to the pool.
    pub fn attach(&self, spec: DeviceSpec) -> Result<()> {
        let output = DeviceOutput::open(
            self.settings.transport.as_ref(),
            &spec,
            self.settings.scheduler,
            self.settings.queue_capacity,
        )?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let change = DeviceChange::Attached {
            device: spec.id,
            motors: spec.motors,
        };
        if let Err(e) =
            state
                .allocator
                .on_device_change(&mut state.registry, change, &mut state.scratch)
        {
            drop(guard);
            output.close();
            return Err(e.into());
        }
        state.outputs.insert(spec.id, output);
        state.dispatch(Dedup::Skip);

        let mut next = self.next_device_id.lock();
        *next = (*next).max(spec.id.0 + 1);
        info!(device = %spec.id, motors = spec.motors, "Device attached");
        Ok(())
    }

    /// Remove a device. Voices on its motors end without a release tail.
    pub fn detach(&self, device: DeviceId) -> Result<()> {
        let output = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.allocator.on_device_change(
                &mut state.registry,
                DeviceChange::Detached(device),
                &mut state.scratch,
            )?;
            state.dispatch(Dedup::Skip);
            state.outputs.remove(&device)
        };

        if let Some(output) = output {
            output.close();
        }
        info!(%device, "Device detached");
        Ok(())
    }

    /// Apply queued hot-plug notifications.
    pub fn apply_device_events(&self) {
        for event in self.notify_rx.try_iter() {
            let result = match event {
                DeviceEvent::Attached(spec) => {
                    let device = spec.id;
                    self.attach(spec).map_err(|e| (device, e))
                }
                DeviceEvent::Detached(device) => self.detach(device).map_err(|e| (device, e)),
            };
            if let Err((device, e)) = result {
                error!(%device, "Device change failed: {e}");
            }
        }
    }

    /// Silence everything, flush every device and close the links.
    pub fn shutdown(&self) {
        self.silence_all();
        let outputs = std::mem::take(&mut self.state.lock().outputs);
        for (_, output) in outputs {
            output.close();
        }
        info!("Session shut down");
    }
}

fn log_allocation(note: u8, channel: u8, allocation: &Allocation) {
    let name = note_name(note);
    match allocation {
        Allocation::Allocated { motor, .. } => {
            debug!(channel, %motor, "Note on {name}");
        }
        Allocation::Stolen {
            motor,
            stolen_voice_id,
            ..
        } => {
            debug!(channel, %motor, stolen_voice_id, "Note on {name} (stolen)");
        }
        Allocation::Retriggered { motor, .. } => {
            debug!(channel, %motor, "Note on {name} (retrigger)");
        }
        Allocation::Dropped => {
            debug!(channel, "Note on {name} dropped, no motor");
        }
        Allocation::Released => {
            debug!(channel, "Note off {name}");
        }
    }
}
