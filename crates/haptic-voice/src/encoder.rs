//! Note and velocity to motor drive parameters.
//!
//! Motors are driven with discrete parameter updates, not sample streams,
//! so the encoder runs once per voice transition.

use crate::command::{Command, DriveHint, MotorId};
use crate::error::{Error, Result};
use crate::voice::Voice;
use std::time::Duration;

/// Reference pitch for A4.
pub const A4_FREQ: f32 = 440.0;

/// MIDI note number for A4.
pub const A4_NOTE: u8 = 69;

/// Highest valid MIDI data value (note, velocity).
pub const MIDI_DATA_MAX: u8 = 127;

/// 12-TET frequency of `note` relative to A4 = 440 Hz.
#[inline]
pub fn note_to_hz(note: u8) -> f32 {
    note_to_hz_with_reference(note, A4_FREQ)
}

#[inline]
pub fn note_to_hz_with_reference(note: u8, reference_hz: f32) -> f32 {
    let semitones = f64::from(note.min(MIDI_DATA_MAX)) - f64::from(A4_NOTE);
    (f64::from(reference_hz) * 2f64.powf(semitones / 12.0)) as f32
}

/// Output range a velocity is scaled into.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AmplitudeRange {
    pub min: f32,
    pub max: f32,
}

impl AmplitudeRange {
    pub fn new(min: f32, max: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(Error::InvalidConfig(format!(
                "amplitude range {min}..{max} must satisfy 0 <= min <= max <= 1"
            )));
        }
        Ok(Self { min, max })
    }
}

impl Default for AmplitudeRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// Converts voices into drive commands.
///
/// Pre-computes the 128-note frequency table.
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    freq_table: [f32; 128],
    amplitude: AmplitudeRange,
}

impl CommandEncoder {
    pub fn new(reference_hz: f32, amplitude: AmplitudeRange) -> Result<Self> {
        if !reference_hz.is_finite() || reference_hz <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "reference pitch must be positive, got {reference_hz}"
            )));
        }
        Ok(Self {
            freq_table: frequency_table(reference_hz),
            amplitude,
        })
    }

    /// Out-of-range notes clamp to 127.
    #[inline]
    pub fn frequency(&self, note: u8) -> f32 {
        self.freq_table[usize::from(note.min(MIDI_DATA_MAX))]
    }

    /// Linear velocity scaling; out-of-range velocities clamp to 127.
    #[inline]
    pub fn amplitude(&self, velocity: u8) -> f32 {
        let v = f32::from(velocity.min(MIDI_DATA_MAX)) / f32::from(MIDI_DATA_MAX);
        self.amplitude.min + (self.amplitude.max - self.amplitude.min) * v
    }

    pub fn amplitude_range(&self) -> AmplitudeRange {
        self.amplitude
    }

    /// Drive the voice's motor until further notice.
    pub fn drive(&self, voice: &Voice) -> Command {
        Command {
            motor: voice.motor,
            voice: Some(voice.id),
            frequency_hz: self.frequency(voice.note),
            amplitude: self.amplitude(voice.velocity),
            hint: DriveHint::Sustain,
        }
    }

    /// Keep the voice sounding for its release tail only.
    pub fn release(&self, voice: &Voice, tail: Duration) -> Command {
        Command {
            hint: DriveHint::For(tail),
            ..self.drive(voice)
        }
    }

    pub fn silence(&self, motor: MotorId) -> Command {
        Command::silence(motor)
    }
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self {
            freq_table: frequency_table(A4_FREQ),
            amplitude: AmplitudeRange::default(),
        }
    }
}

fn frequency_table(reference_hz: f32) -> [f32; 128] {
    let mut table = [0.0; 128];
    for (note, freq) in table.iter_mut().enumerate() {
        *freq = note_to_hz_with_reference(note as u8, reference_hz);
    }
    table
}
