//! Note events as the allocator consumes them.
//!
//! Only the subset of MIDI that drives motors is represented. Everything
//! else (program change, pitch bend, clock, sysex) decodes to `None`.

use crate::error::{Error, Result};
use std::time::Duration;

/// CC 120: All Sound Off.
pub const CC_ALL_SOUND_OFF: u8 = 120;

/// CC 123: All Notes Off.
pub const CC_ALL_NOTES_OFF: u8 = 123;

const DATA_MAX: u8 = 0x7F;
const CHANNEL_MAX: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NoteEventKind {
    /// Velocity is always non-zero; zero-velocity note-ons decode as `NoteOff`
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
    /// Silence every motor (CC 120/123)
    AllNotesOff,
    /// Transport stop (0xFC) or user cancellation
    Stop,
}

/// A note event on a MIDI channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NoteEvent {
    /// MIDI channel (0-15)
    pub channel: u8,
    pub kind: NoteEventKind,
}

impl NoteEvent {
    /// Out-of-range fields are clamped; velocity 0 yields a note-off.
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        let velocity = velocity.min(DATA_MAX);
        let note = note.min(DATA_MAX);
        let kind = if velocity == 0 {
            NoteEventKind::NoteOff { note }
        } else {
            NoteEventKind::NoteOn { note, velocity }
        };
        Self {
            channel: channel.min(CHANNEL_MAX),
            kind,
        }
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        Self {
            channel: channel.min(CHANNEL_MAX),
            kind: NoteEventKind::NoteOff {
                note: note.min(DATA_MAX),
            },
        }
    }

    /// CC 120 and 123 become [`NoteEventKind::AllNotesOff`].
    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        let controller = controller.min(DATA_MAX);
        let kind = match controller {
            CC_ALL_SOUND_OFF | CC_ALL_NOTES_OFF => NoteEventKind::AllNotesOff,
            _ => NoteEventKind::ControlChange {
                controller,
                value: value.min(DATA_MAX),
            },
        };
        Self {
            channel: channel.min(CHANNEL_MAX),
            kind,
        }
    }

    pub fn stop() -> Self {
        Self {
            channel: 0,
            kind: NoteEventKind::Stop,
        }
    }

    /// Decode one raw MIDI message.
    ///
    /// Returns `Ok(None)` for messages that do not affect motors. Running
    /// status is not supported: every message must start with a status byte.
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        let Some(&status) = bytes.first() else {
            return Err(Error::MalformedMessage("empty message".to_string()));
        };
        if status & 0x80 == 0 {
            return Err(Error::MalformedMessage(format!(
                "expected status byte, got {status:#04x}"
            )));
        }

        let channel = status & 0x0F;
        let data = |index: usize| -> Result<u8> {
            bytes.get(index).map(|b| b & DATA_MAX).ok_or_else(|| {
                Error::MalformedMessage(format!(
                    "status {status:#04x} needs {index} data bytes, got {}",
                    bytes.len() - 1
                ))
            })
        };

        let event = match status & 0xF0 {
            0x80 => Some(Self::note_off(channel, data(1)?)),
            0x90 => Some(Self::note_on(channel, data(1)?, data(2)?)),
            0xB0 => Some(Self::control_change(channel, data(1)?, data(2)?)),
            0xF0 if status == 0xFC => Some(Self::stop()),
            _ => None,
        };
        Ok(event)
    }

    pub fn note(&self) -> Option<u8> {
        match self.kind {
            NoteEventKind::NoteOn { note, .. } | NoteEventKind::NoteOff { note } => Some(note),
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self.kind, NoteEventKind::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self.kind, NoteEventKind::NoteOff { .. })
    }
}

/// A note event with its time from the start of playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimedNoteEvent {
    pub at: Duration,
    pub event: NoteEvent,
}
