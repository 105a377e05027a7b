//! Centralized error type for the haptic-synth umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Voice: {0}")]
    Voice(#[from] haptic_voice::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] haptic_midi::Error),

    #[error("Output: {0}")]
    Output(#[from] haptic_output::Error),

    #[error("No device could be opened")]
    NoDevices,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Live input requires the `midi-io` feature")]
    LiveInputUnavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
