//! # Haptic Synth - Polyphonic MIDI on Haptic Motors
//!
//! Plays MIDI on vibration motors. Every motor on every connected device is
//! one synthesizer voice, so polyphony grows with the number of devices.
//!
//! ## Architecture
//!
//! Haptic Synth is an umbrella crate that coordinates:
//! - **haptic-voice** - Motor registry, voice table, allocation policies, command encoding
//! - **haptic-midi** - Note events from MIDI files (real-time playback) or live input
//! - **haptic-output** - Per-device command queues, frame codec, transports, pacing threads
//!
//! A [`Session`] owns the allocator under one lock and routes its commands to
//! one output pipeline per device.
//!
//! ## Quick Start
//!
//! ```
//! use haptic_synth::prelude::*;
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! let session = Session::builder(Arc::new(RecordingTransport::new()))
//!     .device(DeviceSpec::new(DeviceId(0), 2))
//!     .build()?;
//!
//! session.handle_event(&NoteEvent::note_on(0, 69, 100), Instant::now());
//! assert_eq!(session.voice_count(), 1);
//!
//! session.shutdown();
//! # Ok::<(), haptic_synth::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `midi-io` (default) - Live MIDI input via midir
//! - `serial` - USB serial device transport
//! - `usb` - Steam Controllers over raw USB (rusb)

/// Re-export of haptic-voice for direct access
pub use haptic_voice as voice;

/// Re-export of haptic-midi for direct access
pub use haptic_midi as midi;

/// Re-export of haptic-output for direct access
pub use haptic_output as output;

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{Mode, ResolvedConfig, SynthConfig, DEFAULT_MOTORS_PER_DEVICE};

mod builder;
mod runner;
mod session;

pub use builder::SessionBuilder;
#[cfg(feature = "midi-io")]
pub use runner::run_live;
pub use runner::{
    run_file, run_tune, ReleaseClock, RunReport, RELEASE_CLOCK_INTERVAL, TUNE_LAST_NOTE,
};
pub use session::{DeviceEvent, DeviceNotifier, Session};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{Session, SessionBuilder, SynthConfig};

    pub use crate::voice::{AllocatorConfig, AllocatorPolicy, DeviceId, MotorId};

    pub use crate::midi::{stop_channel, NoteEvent, ParsedMidiFile};

    pub use crate::output::{DeviceSpec, LogTransport, RecordingTransport, Transport};

    #[cfg(feature = "serial")]
    pub use crate::output::SerialTransport;

    #[cfg(feature = "usb")]
    pub use crate::output::SteamControllerTransport;
}
