//! Note event sources for haptic synthesis.
//!
//! - [`ParsedMidiFile`] - Standard MIDI File flattened to timed note events
//! - [`Playback`] - Real-time pacing of a parsed file, cancellable via [`StopHandle`]
//! - [`LiveInput`] - Hardware MIDI input (requires the `midi-io` feature)
//!
//! Everything decodes to [`NoteEvent`], the subset of MIDI that drives motors.

pub mod error;
pub use error::{Error, Result};

mod event;
pub use event::{NoteEvent, NoteEventKind, TimedNoteEvent, CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF};

mod file;
pub use file::{ParsedMidiFile, DEFAULT_TEMPO_US_PER_BEAT};

mod player;
pub use player::{stop_channel, Playback, StopHandle, StopSignal};

mod note;
pub use note::note_name;

#[cfg(feature = "midi-io")]
mod input;
#[cfg(feature = "midi-io")]
pub use input::{list_input_ports, LiveInput, MidiInputDevice, INPUT_QUEUE_CAPACITY};
