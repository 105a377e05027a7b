//! Error types for haptic-voice.

use crate::command::DeviceId;
use thiserror::Error;

/// Result type alias for haptic-voice operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while maintaining the motor pool.
///
/// Pool exhaustion is not an error; the allocators steal or overwrite.
#[derive(Debug, Error)]
pub enum Error {
    /// A device with this id is already registered.
    #[error("device {0} is already attached")]
    DuplicateDevice(DeviceId),

    /// No device with this id is registered.
    #[error("device {0} is not attached")]
    UnknownDevice(DeviceId),

    /// Invalid configuration parameter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
