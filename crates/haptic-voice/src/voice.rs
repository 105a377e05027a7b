//! Live voices and the table that holds them.

use crate::command::{DeviceId, MotorId};
use std::cmp::Ordering;
use std::time::Instant;

/// Unique identifier for a voice instance.
pub type VoiceId = u64;

/// Lifecycle state of a sounding voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Key is down; motor driven with sustain
    Active,
    /// Key released; motor runs out its release tail
    Releasing,
}

/// A note bound to a motor.
#[derive(Debug, Clone)]
pub struct Voice {
    pub id: VoiceId,
    /// MIDI note number (0-127)
    pub note: u8,
    /// MIDI velocity (0-127)
    pub velocity: u8,
    /// MIDI channel (0-15)
    pub channel: u8,
    pub motor: MotorId,
    pub state: VoiceState,
    pub started_at: Instant,
    /// Set when the voice enters `Releasing`
    pub release_deadline: Option<Instant>,
}

impl Voice {
    pub fn is_active(&self) -> bool {
        self.state == VoiceState::Active
    }

    /// Steal priority: older first, then quieter, then lower id.
    ///
    /// `Ordering::Less` means `self` should be evicted before `other`.
    pub fn steal_order(&self, other: &Voice) -> Ordering {
        self.started_at
            .cmp(&other.started_at)
            .then(self.velocity.cmp(&other.velocity))
            .then(self.id.cmp(&other.id))
    }
}

/// The set of voices currently holding motors.
///
/// Capacity is bounded by the caller: a voice is only inserted after its
/// motor was taken from the registry, so the table can never outgrow the
/// motor pool.
#[derive(Debug, Clone, Default)]
pub struct VoiceTable {
    voices: Vec<Voice>,
}

impl VoiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            voices: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> + '_ {
        self.voices.iter()
    }

    pub fn insert(&mut self, voice: Voice) {
        debug_assert!(
            self.by_motor(voice.motor).is_none(),
            "motor {} already carries a voice",
            voice.motor
        );
        self.voices.push(voice);
    }

    pub fn get(&self, id: VoiceId) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == id)
    }

    pub fn remove(&mut self, id: VoiceId) -> Option<Voice> {
        let index = self.voices.iter().position(|v| v.id == id)?;
        Some(self.voices.remove(index))
    }

    pub fn by_motor(&self, motor: MotorId) -> Option<&Voice> {
        self.voices.iter().find(|v| v.motor == motor)
    }

    /// The Active voice playing `note` on `channel`, if any.
    pub fn find_active_mut(&mut self, note: u8, channel: u8) -> Option<&mut Voice> {
        self.voices
            .iter_mut()
            .find(|v| v.is_active() && v.note == note && v.channel == channel)
    }

    pub fn find_active(&self, note: u8, channel: u8) -> Option<&Voice> {
        self.voices
            .iter()
            .find(|v| v.is_active() && v.note == note && v.channel == channel)
    }

    /// The voice to evict when no motor is free.
    pub fn steal_candidate(&self) -> Option<VoiceId> {
        self.voices
            .iter()
            .min_by(|a, b| a.steal_order(b))
            .map(|v| v.id)
    }

    /// Releasing voices whose tail has elapsed at `now`.
    pub fn due_releases(&self, now: Instant) -> Vec<VoiceId> {
        self.voices
            .iter()
            .filter(|v| {
                v.state == VoiceState::Releasing
                    && v.release_deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|v| v.id)
            .collect()
    }

    /// Remove and return every voice bound to a motor of `device`.
    pub fn drain_device(&mut self, device: DeviceId) -> Vec<Voice> {
        let (removed, kept) = std::mem::take(&mut self.voices)
            .into_iter()
            .partition(|v| v.motor.device == device);
        self.voices = kept;
        removed
    }

    pub fn drain(&mut self) -> Vec<Voice> {
        std::mem::take(&mut self.voices)
    }
}
