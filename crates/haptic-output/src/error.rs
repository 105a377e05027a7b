//! Error types for device output.

use haptic_voice::DeviceId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open {device}: {reason}")]
    Open { device: DeviceId, reason: String },

    #[error("Write to {device} failed: {reason}")]
    Write { device: DeviceId, reason: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Thread spawn failed: {0}")]
    ThreadSpawn(String),

    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
