//! Error types for the note event sources.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a readable Standard MIDI File
    #[error("MIDI file parse error: {0}")]
    MidiFileParse(String),

    #[error("Malformed MIDI message: {0}")]
    MalformedMessage(String),

    #[error("No MIDI input ports available")]
    NoInputPorts,

    #[error("No MIDI input matching '{0}'")]
    InputNotFound(String),

    /// Backend failure opening or reading an input
    #[error("MIDI input '{port}': {reason}")]
    Input { port: String, reason: String },
}

impl From<midly::Error> for Error {
    fn from(e: midly::Error) -> Self {
        Error::MidiFileParse(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::Input {
            port: "<backend>".to_string(),
            reason: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
