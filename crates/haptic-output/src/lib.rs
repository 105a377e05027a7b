//! Per-device output for haptic synthesis.
//!
//! The session pushes [`Command`](haptic_voice::Command)s into one bounded
//! [`command_queue`] per device. Each device's [`OutputScheduler`] thread
//! drains its queue at a paced rate, coalesces to the last command per
//! motor, encodes [frames](frame) and writes them through a [`Transport`].

pub mod error;
pub use error::{Error, Result};

pub mod frame;
pub use frame::{controller_report, decode_frame, encode_frames, Frame, MotorRecord};

mod queue;
pub use queue::{
    command_queue, CommandConsumer, CommandProducer, PushOutcome, DEFAULT_QUEUE_CAPACITY,
};

mod transport;
pub use transport::{DeviceLink, DeviceSpec, LogTransport, RecordingTransport, Transport};

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
pub use serial::{SerialTransport, DEFAULT_BAUD_RATE};

#[cfg(feature = "usb")]
mod usb;
#[cfg(feature = "usb")]
pub use usb::{SteamControllerTransport, STEAM_VENDOR_ID, WIRED_CONTROLLER_PRODUCT_ID};

mod scheduler;
pub use scheduler::{
    OutputScheduler, SchedulerConfig, SchedulerCore, SchedulerStats, StatsSnapshot,
    DEFAULT_MIN_UPDATE_INTERVAL,
};
