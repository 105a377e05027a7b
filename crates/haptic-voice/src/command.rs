//! Motor addressing and drive commands.

use crate::voice::VoiceId;
use std::fmt;
use std::time::Duration;

/// Stable identifier of a connected device.
///
/// Assigned by the session when the device is attached; never reused while
/// the process runs, so a detached device cannot alias a new one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Address of one motor: (device, slot on that device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MotorId {
    pub device: DeviceId,
    pub slot: u8,
}

impl MotorId {
    pub const fn new(device: DeviceId, slot: u8) -> Self {
        Self { device, slot }
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.slot)
    }
}

/// How long the device should keep driving a motor after the command lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveHint {
    /// Keep driving until the next command for this motor.
    Sustain,
    /// Drive for the given time, then stop on the device side.
    For(Duration),
}

/// A single motor parameter update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub motor: MotorId,
    /// Voice that produced this command (`None` for silence)
    pub voice: Option<VoiceId>,
    /// Drive frequency in Hz (0.0 = silent)
    pub frequency_hz: f32,
    /// Normalized drive amplitude (0.0-1.0)
    pub amplitude: f32,
    pub hint: DriveHint,
}

impl Command {
    /// Stop the motor.
    pub fn silence(motor: MotorId) -> Self {
        Self {
            motor,
            voice: None,
            frequency_hz: 0.0,
            amplitude: 0.0,
            hint: DriveHint::For(Duration::ZERO),
        }
    }

    pub fn is_silence(&self) -> bool {
        self.frequency_hz <= 0.0
            || self.amplitude <= 0.0
            || self.hint == DriveHint::For(Duration::ZERO)
    }

    /// True if both commands would put the motor in the same state.
    ///
    /// The originating voice is ignored: a retrigger of the same pitch and
    /// level is not a new device state.
    pub fn same_drive(&self, other: &Command) -> bool {
        if self.is_silence() && other.is_silence() {
            return self.motor == other.motor;
        }
        self.motor == other.motor
            && self.frequency_hz == other.frequency_hz
            && self.amplitude == other.amplitude
            && self.hint == other.hint
    }
}
