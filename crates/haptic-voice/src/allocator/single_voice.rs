//! One motor per MIDI channel.
//!
//! The legacy file-playback mode: channel `c` plays on the `c`-th motor in
//! registry order (two touchpads per device gives left/right pads of device
//! `c / 2`). A new note on a channel cuts the previous one. Channels past
//! the last motor are dropped.

use super::{clamp_event, Allocation, AllocatorPolicy, DeviceChange, NoteAllocator, MAX_CHANNEL};
use crate::command::{Command, MotorId};
use crate::encoder::CommandEncoder;
use crate::error::Result;
use crate::registry::MotorRegistry;
use crate::voice::{Voice, VoiceId, VoiceState};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct ChannelSlot {
    motor: MotorId,
    voice: Option<Voice>,
}

/// Channel-mapped allocator.
pub struct SingleVoiceAllocator {
    channels: BTreeMap<u8, ChannelSlot>,
    encoder: CommandEncoder,
    next_voice_id: VoiceId,
}

impl SingleVoiceAllocator {
    /// Build the channel map from the registry as it is now.
    pub fn new(registry: &MotorRegistry, encoder: CommandEncoder) -> Self {
        let channels: BTreeMap<u8, ChannelSlot> = registry
            .motors()
            .iter()
            .take(usize::from(MAX_CHANNEL) + 1)
            .enumerate()
            .map(|(channel, motor)| {
                (
                    channel as u8,
                    ChannelSlot {
                        motor: motor.id(),
                        voice: None,
                    },
                )
            })
            .collect();

        if registry.total_motor_count() > channels.len() {
            info!(
                "{} motors available, only {} channels can be mapped",
                registry.total_motor_count(),
                channels.len()
            );
        }

        Self {
            channels,
            encoder,
            next_voice_id: 1,
        }
    }

    /// Motor assigned to `channel`, if it has one.
    pub fn motor_for(&self, channel: u8) -> Option<MotorId> {
        self.channels.get(&channel).map(|slot| slot.motor)
    }

    pub fn mapped_channels(&self) -> usize {
        self.channels.len()
    }
}

impl NoteAllocator for SingleVoiceAllocator {
    fn policy(&self) -> AllocatorPolicy {
        AllocatorPolicy::SingleVoice
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

        let Some(slot) = self.channels.get_mut(&channel) else {
            debug!(channel, note, "Channel has no motor, dropping note");
            return Allocation::Dropped;
        };

        let replaced = slot.voice.take();
        if replaced.is_some() {
            registry.mark_free(slot.motor);
        }

        let voice_id = self.next_voice_id;
        self.next_voice_id += 1;
        let voice = Voice {
            id: voice_id,
            note,
            velocity,
            channel,
            motor: slot.motor,
            state: VoiceState::Active,
            started_at: now,
            release_deadline: None,
        };

        registry.mark_bound(slot.motor, voice_id);
        out.push(self.encoder.drive(&voice));
        slot.voice = Some(voice);

        match replaced {
            Some(old) => Allocation::Retriggered {
                voice_id,
                motor: slot.motor,
                replaced_voice_id: old.id,
            },
            None => Allocation::Allocated {
                voice_id,
                motor: slot.motor,
            },
        }
    }

    fn on_note_off(
        &mut self,
        registry: &mut MotorRegistry,
        note: u8,
        channel: u8,
        _now: Instant,
        out: &mut Vec<Command>,
    ) {
        let (note, _, channel) = clamp_event(note, 0, channel);
        let Some(slot) = self.channels.get_mut(&channel) else {
            return;
        };

        // A note-off for a note that was already cut by a newer one is stale
        if slot.voice.as_ref().is_some_and(|v| v.note == note) {
            slot.voice = None;
            registry.mark_free(slot.motor);
            out.push(self.encoder.silence(slot.motor));
        }
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
                info!(%device, "Device attached; channel map is fixed for this session");
            }
            DeviceChange::Detached(device) => {
                registry.detach_device(device)?;
                let before = self.channels.len();
                self.channels.retain(|_, slot| slot.motor.device != device);
                debug!(
                    %device,
                    unmapped = before - self.channels.len(),
                    "Unmapped channels on detach"
                );
            }
        }
        Ok(())
    }

    fn tick(&mut self, _registry: &mut MotorRegistry, _now: Instant, _out: &mut Vec<Command>) {}

    fn silence_all(&mut self, registry: &mut MotorRegistry, out: &mut Vec<Command>) {
        for slot in self.channels.values_mut() {
            slot.voice = None;
            registry.mark_free(slot.motor);
            out.push(self.encoder.silence(slot.motor));
        }
    }

    fn voice_count(&self) -> usize {
        self.channels.values().filter(|s| s.voice.is_some()).count()
    }

    fn snapshot(&self) -> Vec<Voice> {
        self.channels
            .values()
            .filter_map(|s| s.voice.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DeviceId;

    fn setup(devices: u32) -> (MotorRegistry, SingleVoiceAllocator) {
        let mut registry = MotorRegistry::new();
        for id in 0..devices {
            registry.attach_device(DeviceId(id), 2).unwrap();
        }
        let alloc = SingleVoiceAllocator::new(&registry, CommandEncoder::default());
        (registry, alloc)
    }

    #[test]
    fn test_channel_map_follows_registry() {
        let (_, alloc) = setup(2);
        assert_eq!(alloc.mapped_channels(), 4);
        assert_eq!(alloc.motor_for(0), Some(MotorId::new(DeviceId(0), 0)));
        assert_eq!(alloc.motor_for(1), Some(MotorId::new(DeviceId(0), 1)));
        assert_eq!(alloc.motor_for(3), Some(MotorId::new(DeviceId(1), 1)));
        assert_eq!(alloc.motor_for(4), None);
    }

    #[test]
    fn test_map_caps_at_sixteen_channels() {
        let (_, alloc) = setup(9);
        assert_eq!(alloc.mapped_channels(), 16);
    }

    #[test]
    fn test_retrigger_overwrites_channel() {
        let (mut reg, mut alloc) = setup(1);
        let mut out = Vec::new();
        let now = Instant::now();

        alloc.on_note_on(&mut reg, 60, 100, 0, now, &mut out);
        let result = alloc.on_note_on(&mut reg, 72, 100, 0, now, &mut out);

        assert!(matches!(
            result,
            Allocation::Retriggered { replaced_voice_id: 1, .. }
        ));
        assert_eq!(alloc.voice_count(), 1);
        assert_eq!(alloc.snapshot()[0].note, 72);
        assert_eq!(reg.free_count(), 1);
    }

    #[test]
    fn test_stale_note_off_ignored() {
        let (mut reg, mut alloc) = setup(1);
        let mut out = Vec::new();
        let now = Instant::now();

        alloc.on_note_on(&mut reg, 60, 100, 0, now, &mut out);
        alloc.on_note_on(&mut reg, 72, 100, 0, now, &mut out);
        alloc.on_note_off(&mut reg, 60, 0, now, &mut out);
        assert_eq!(alloc.voice_count(), 1);
        assert_eq!(out.len(), 2);

        alloc.on_note_off(&mut reg, 72, 0, now, &mut out);
        assert_eq!(alloc.voice_count(), 0);
        assert!(out[2].is_silence());
    }

    #[test]
    fn test_unmapped_channel_dropped() {
        let (mut reg, mut alloc) = setup(1);
        let mut out = Vec::new();

        let result = alloc.on_note_on(&mut reg, 60, 100, 5, Instant::now(), &mut out);
        assert_eq!(result, Allocation::Dropped);
        assert!(out.is_empty());
    }

    #[test]
    fn test_detach_unmaps_channels() {
        let (mut reg, mut alloc) = setup(2);
        let mut out = Vec::new();
        let now = Instant::now();

        alloc.on_note_on(&mut reg, 60, 100, 2, now, &mut out);
        alloc
            .on_device_change(&mut reg, DeviceChange::Detached(DeviceId(1)), &mut out)
            .unwrap();

        assert_eq!(alloc.voice_count(), 0);
        assert_eq!(alloc.motor_for(2), None);
        assert_eq!(
            alloc.on_note_on(&mut reg, 60, 100, 2, now, &mut out),
            Allocation::Dropped
        );
    }
}
