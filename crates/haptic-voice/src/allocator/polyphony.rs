//! Dynamic motor pool with voice stealing.
//!
//! Any free motor on any device can take any note. When none is free the
//! oldest voice (quietest on ties) gives up its motor, so every note-on is
//! heard.

use super::{clamp_event, Allocation, AllocatorPolicy, DeviceChange, NoteAllocator};
use crate::command::{Command, MotorId};
use crate::encoder::CommandEncoder;
use crate::error::Result;
use crate::registry::MotorRegistry;
use crate::voice::{Voice, VoiceId, VoiceState, VoiceTable};
use std::time::{Duration, Instant};
use tracing::debug;

/// Polyphonic allocator over the whole motor registry.
pub struct PolyphonyAllocator {
    voices: VoiceTable,
    encoder: CommandEncoder,
    release_tail: Duration,
    next_voice_id: VoiceId,
}

impl PolyphonyAllocator {
    pub fn new(registry: &MotorRegistry, encoder: CommandEncoder, release_tail: Duration) -> Self {
        Self {
            voices: VoiceTable::with_capacity(registry.total_motor_count()),
            encoder,
            release_tail,
            next_voice_id: 1,
        }
    }

    pub fn voices(&self) -> &VoiceTable {
        &self.voices
    }

    pub fn release_tail(&self) -> Duration {
        self.release_tail
    }

    #[allow(clippy::too_many_arguments)]
    fn bind(
        &mut self,
        registry: &mut MotorRegistry,
        motor: MotorId,
        note: u8,
        velocity: u8,
        channel: u8,
        now: Instant,
        out: &mut Vec<Command>,
    ) -> VoiceId {
        let id = self.next_voice_id;
        self.next_voice_id += 1;

        let voice = Voice {
            id,
            note,
            velocity,
            channel,
            motor,
            state: VoiceState::Active,
            started_at: now,
            release_deadline: None,
        };

        registry.mark_bound(motor, id);
        out.push(self.encoder.drive(&voice));
        self.voices.insert(voice);
        id
    }

    /// Remove a voice and hand its motor back to the registry.
    fn evict(&mut self, registry: &mut MotorRegistry, id: VoiceId) -> Option<Voice> {
        let voice = self.voices.remove(id)?;
        registry.mark_free(voice.motor);
        Some(voice)
    }
}

impl NoteAllocator for PolyphonyAllocator {
    fn policy(&self) -> AllocatorPolicy {
        AllocatorPolicy::Polyphony
    }

    fn on_note_on(
        &mut self,
        registry: &mut MotorRegistry,
        note: u8,
        velocity: u8,
        channel: u8,
        now: Instant,
        out: &mut Vec<Command>,
    ) -> Allocation {
        let (note, velocity, channel) = clamp_event(note, velocity, channel);
        if velocity == 0 {
            self.on_note_off(registry, note, channel, now, out);
            return Allocation::Released;
        }

        // Same key struck again: reuse its motor
        if let Some(existing) = self.voices.find_active(note, channel).map(|v| v.id) {
            if let Some(old) = self.evict(registry, existing) {
                let voice_id = self.bind(registry, old.motor, note, velocity, channel, now, out);
                debug!(note, channel, voice_id, motor = %old.motor, "Retriggered voice");
                return Allocation::Retriggered {
                    voice_id,
                    motor: old.motor,
                    replaced_voice_id: old.id,
                };
            }
        }

        let free = registry.iterate_free().next().map(|m| m.id());
        if let Some(motor) = free {
            let voice_id = self.bind(registry, motor, note, velocity, channel, now, out);
            debug!(note, channel, voice_id, %motor, "Allocated voice");
            return Allocation::Allocated { voice_id, motor };
        }

        let Some(victim) = self.voices.steal_candidate() else {
            debug!(note, channel, "No motors attached, dropping note");
            return Allocation::Dropped;
        };
        let Some(stolen) = self.evict(registry, victim) else {
            return Allocation::Dropped;
        };

        let voice_id = self.bind(registry, stolen.motor, note, velocity, channel, now, out);
        debug!(
            note,
            channel,
            voice_id,
            stolen_note = stolen.note,
            motor = %stolen.motor,
            "Stole voice"
        );
        Allocation::Stolen {
            voice_id,
            motor: stolen.motor,
            stolen_voice_id: stolen.id,
        }
    }

    fn on_note_off(
        &mut self,
        registry: &mut MotorRegistry,
        note: u8,
        channel: u8,
        now: Instant,
        out: &mut Vec<Command>,
    ) {
        let (note, _, channel) = clamp_event(note, 0, channel);
        let Some(voice) = self.voices.find_active_mut(note, channel) else {
            // Duplicate or late note-off
            debug!(note, channel, "Note-off without active voice");
            return;
        };

        if self.release_tail.is_zero() {
            let id = voice.id;
            if let Some(voice) = self.evict(registry, id) {
                out.push(self.encoder.silence(voice.motor));
            }
            return;
        }

        voice.state = VoiceState::Releasing;
        voice.release_deadline = Some(now + self.release_tail);
        out.push(self.encoder.release(voice, self.release_tail));
    }

    fn on_device_change(
        &mut self,
        registry: &mut MotorRegistry,
        change: DeviceChange,
        _out: &mut Vec<Command>,
    ) -> Result<()> {
        match change {
            DeviceChange::Attached { device, motors } => {
                registry.attach_device(device, motors)?;
            }
            DeviceChange::Detached(device) => {
                registry.detach_device(device)?;
                let dropped = self.voices.drain_device(device);
                if !dropped.is_empty() {
                    debug!(%device, count = dropped.len(), "Force-released voices on detach");
                }
            }
        }
        Ok(())
    }

    fn tick(&mut self, registry: &mut MotorRegistry, now: Instant, out: &mut Vec<Command>) {
        for id in self.voices.due_releases(now) {
            if let Some(voice) = self.evict(registry, id) {
                out.push(self.encoder.silence(voice.motor));
            }
        }
    }

    fn silence_all(&mut self, registry: &mut MotorRegistry, out: &mut Vec<Command>) {
        self.voices.drain();
        let motors: Vec<MotorId> = registry.motors().iter().map(|m| m.id()).collect();
        for motor in motors {
            registry.mark_free(motor);
            out.push(self.encoder.silence(motor));
        }
    }

    fn voice_count(&self) -> usize {
        self.voices.len()
    }

    fn snapshot(&self) -> Vec<Voice> {
        self.voices.iter().cloned().collect()
    }
}
