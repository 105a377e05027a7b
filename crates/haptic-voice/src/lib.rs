//! Voice allocation for multi-device haptic synthesis.
//!
//! Every motor on every attached device is a synthesizer voice:
//!
//! - **[`MotorRegistry`]** - Ordered pool of motors across devices
//! - **[`VoiceTable`]** - Notes currently bound to motors
//! - **[`NoteAllocator`]** - Allocation policy ([`PolyphonyAllocator`] with
//!   stealing, or the channel-mapped [`SingleVoiceAllocator`])
//! - **[`CommandEncoder`]** - Note/velocity to drive frequency/amplitude
//!
//! # Quick Start
//!
//! ```
//! use haptic_voice::{build_allocator, AllocatorConfig, DeviceId, MotorRegistry};
//! use std::time::Instant;
//!
//! let mut registry = MotorRegistry::new();
//! registry.attach_device(DeviceId(0), 2)?;
//!
//! let mut allocator = build_allocator(&registry, AllocatorConfig::default());
//! let mut commands = Vec::new();
//! allocator.on_note_on(&mut registry, 69, 100, 0, Instant::now(), &mut commands);
//!
//! assert_eq!(commands[0].frequency_hz, 440.0);
//! # Ok::<(), haptic_voice::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

mod command;
pub use command::{Command, DeviceId, DriveHint, MotorId};

mod registry;
pub use registry::{Motor, MotorRegistry, Occupancy};

mod voice;
pub use voice::{Voice, VoiceId, VoiceState, VoiceTable};

mod encoder;
pub use encoder::{
    note_to_hz, note_to_hz_with_reference, AmplitudeRange, CommandEncoder, A4_FREQ, A4_NOTE,
    MIDI_DATA_MAX,
};

mod allocator;
pub use allocator::{
    build_allocator, Allocation, AllocatorConfig, AllocatorPolicy, DeviceChange, NoteAllocator,
    PolyphonyAllocator, SingleVoiceAllocator, DEFAULT_RELEASE_TAIL, MAX_CHANNEL,
};
