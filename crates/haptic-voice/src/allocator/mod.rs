//! Note-to-motor allocation policies.
//!
//! Both policies implement [`NoteAllocator`] and are chosen once, when the
//! session is built. The allocator never owns the [`MotorRegistry`]; the
//! caller passes it into every call so registry and voice state change
//! together under one lock.

mod polyphony;
mod single_voice;

pub use polyphony::PolyphonyAllocator;
pub use single_voice::SingleVoiceAllocator;

use crate::command::{Command, DeviceId, MotorId};
use crate::encoder::{CommandEncoder, MIDI_DATA_MAX};
use crate::error::Result;
use crate::registry::MotorRegistry;
use crate::voice::{Voice, VoiceId};
use std::time::{Duration, Instant};

/// Highest MIDI channel number.
pub const MAX_CHANNEL: u8 = 15;

/// Default delay between note-off and motor silence.
///
/// Haptic motors have no natural decay, so the default tail is short.
pub const DEFAULT_RELEASE_TAIL: Duration = Duration::from_millis(5);

/// Which allocation policy a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorPolicy {
    /// Dynamic voice pool with stealing (required for live input)
    #[default]
    Polyphony,
    /// One motor per MIDI channel, newest note wins
    SingleVoice,
}

impl std::fmt::Display for AllocatorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Polyphony => f.write_str("polyphony"),
            Self::SingleVoice => f.write_str("single_voice"),
        }
    }
}

/// A device entering or leaving the motor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    Attached { device: DeviceId, motors: u8 },
    Detached(DeviceId),
}

/// Outcome of a note-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Bound to a free motor
    Allocated { voice_id: VoiceId, motor: MotorId },
    /// Took the motor of an evicted voice
    Stolen {
        voice_id: VoiceId,
        motor: MotorId,
        stolen_voice_id: VoiceId,
    },
    /// Replaced a voice on the same motor (same key, or same channel)
    Retriggered {
        voice_id: VoiceId,
        motor: MotorId,
        replaced_voice_id: VoiceId,
    },
    /// No motor can carry this note
    Dropped,
    /// Velocity-zero note-on, handled as note-off
    Released,
}

impl Allocation {
    pub fn voice_id(&self) -> Option<VoiceId> {
        match *self {
            Self::Allocated { voice_id, .. }
            | Self::Stolen { voice_id, .. }
            | Self::Retriggered { voice_id, .. } => Some(voice_id),
            Self::Dropped | Self::Released => None,
        }
    }

    pub fn motor(&self) -> Option<MotorId> {
        match *self {
            Self::Allocated { motor, .. }
            | Self::Stolen { motor, .. }
            | Self::Retriggered { motor, .. } => Some(motor),
            Self::Dropped | Self::Released => None,
        }
    }
}

/// Shared settings for both policies.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub policy: AllocatorPolicy,
    /// Time a released voice keeps its motor (polyphony only)
    pub release_tail: Duration,
    pub encoder: CommandEncoder,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            policy: AllocatorPolicy::Polyphony,
            release_tail: DEFAULT_RELEASE_TAIL,
            encoder: CommandEncoder::default(),
        }
    }
}

/// Contract shared by the allocation policies.
///
/// Every method appends the drive commands it produces to `out`, one per
/// voice transition, in the order they must reach the devices.
pub trait NoteAllocator: Send {
    fn policy(&self) -> AllocatorPolicy;

    fn on_note_on(
        &mut self,
        registry: &mut MotorRegistry,
        note: u8,
        velocity: u8,
        channel: u8,
        now: Instant,
        out: &mut Vec<Command>,
    ) -> Allocation;

    fn on_note_off(
        &mut self,
        registry: &mut MotorRegistry,
        note: u8,
        channel: u8,
        now: Instant,
        out: &mut Vec<Command>,
    );

    /// Apply an attach/detach to `registry` and drop voices that lost
    /// their motor. Detached motors get no silence command: the device is
    /// gone.
    fn on_device_change(
        &mut self,
        registry: &mut MotorRegistry,
        change: DeviceChange,
        out: &mut Vec<Command>,
    ) -> Result<()>;

    /// Complete release tails that have elapsed at `now`.
    fn tick(&mut self, registry: &mut MotorRegistry, now: Instant, out: &mut Vec<Command>);

    /// Silence every motor and drop every voice.
    fn silence_all(&mut self, registry: &mut MotorRegistry, out: &mut Vec<Command>);

    fn voice_count(&self) -> usize;

    /// Copy of every sounding voice.
    fn snapshot(&self) -> Vec<Voice>;
}

/// Build the allocator for `config.policy` over the current registry.
pub fn build_allocator(
    registry: &MotorRegistry,
    config: AllocatorConfig,
) -> Box<dyn NoteAllocator> {
    match config.policy {
        AllocatorPolicy::Polyphony => Box::new(PolyphonyAllocator::new(
            registry,
            config.encoder,
            config.release_tail,
        )),
        AllocatorPolicy::SingleVoice => {
            Box::new(SingleVoiceAllocator::new(registry, config.encoder))
        }
    }
}

/// Clamp raw event fields into MIDI range.
#[inline]
pub(crate) fn clamp_event(note: u8, velocity: u8, channel: u8) -> (u8, u8, u8) {
    (
        note.min(MIDI_DATA_MAX),
        velocity.min(MIDI_DATA_MAX),
        channel.min(MAX_CHANNEL),
    )
}
