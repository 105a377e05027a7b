//! Session configuration.
//!
//! [`SynthConfig`] is what the user asks for. [`SynthConfig::resolve`] turns
//! it into a [`ResolvedConfig`]: playback mode chosen, policy forced where
//! the mode requires it, device list expanded and every value validated.

use crate::error::{Error, Result};
use haptic_output::{DeviceSpec, SchedulerConfig, DEFAULT_QUEUE_CAPACITY};
use haptic_voice::{
    AllocatorConfig, AllocatorPolicy, AmplitudeRange, CommandEncoder, DeviceId, A4_FREQ,
    DEFAULT_RELEASE_TAIL,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Touchpads on one controller.
pub const DEFAULT_MOTORS_PER_DEVICE: u8 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub policy: AllocatorPolicy,
    /// Devices to open when no paths are given
    pub devices: usize,
    /// Transport addresses, one device each (overrides `devices`)
    pub device_paths: Vec<String>,
    /// MIDI input port (index or name substring) for live play
    pub input_port: Option<String>,
    /// MIDI file to play; `None` selects live play
    pub file: Option<PathBuf>,
    /// Step one motor through every note instead of playing
    pub tune: bool,
    pub release_tail_ms: u64,
    pub min_update_interval_ms: u64,
    pub queue_capacity: usize,
    pub motors_per_device: u8,
    pub amplitude: AmplitudeRange,
    /// Frequency of A4 in Hz
    pub reference_hz: f32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            policy: AllocatorPolicy::default(),
            devices: 1,
            device_paths: Vec::new(),
            input_port: None,
            file: None,
            tune: false,
            release_tail_ms: DEFAULT_RELEASE_TAIL.as_millis() as u64,
            min_update_interval_ms: SchedulerConfig::default().min_update_interval.as_millis()
                as u64,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            motors_per_device: DEFAULT_MOTORS_PER_DEVICE,
            amplitude: AmplitudeRange::default(),
            reference_hz: A4_FREQ,
        }
    }
}

/// Where note events come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Live { port: Option<String> },
    File(PathBuf),
    /// Calibration sweep over all notes on one motor
    Tune,
}

/// Validated configuration, ready for [`SessionBuilder`](crate::SessionBuilder).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub mode: Mode,
    pub allocator: AllocatorConfig,
    pub devices: Vec<DeviceSpec>,
    pub scheduler: SchedulerConfig,
    pub queue_capacity: usize,
}

impl SynthConfig {
    pub fn resolve(self) -> Result<ResolvedConfig> {
        let mode = match (self.tune, self.file) {
            (true, Some(_)) => {
                return Err(Error::InvalidConfig(
                    "tuning and file playback are exclusive".to_string(),
                ))
            }
            (true, None) => Mode::Tune,
            (false, Some(path)) => Mode::File(path),
            (false, None) => Mode::Live {
                port: self.input_port,
            },
        };

        let mut policy = self.policy;
        if matches!(mode, Mode::Live { .. }) && policy != AllocatorPolicy::Polyphony {
            warn!("Live play always uses polyphony; ignoring requested {policy} policy");
            policy = AllocatorPolicy::Polyphony;
        }

        if self.motors_per_device == 0 {
            return Err(Error::InvalidConfig(
                "motors_per_device must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        let devices: Vec<DeviceSpec> = if self.device_paths.is_empty() {
            if self.devices == 0 {
                return Err(Error::InvalidConfig(
                    "at least one device is required".to_string(),
                ));
            }
            (0..self.devices)
                .map(|i| DeviceSpec::new(DeviceId(i as u32), self.motors_per_device))
                .collect()
        } else {
            self.device_paths
                .iter()
                .enumerate()
                .map(|(i, path)| {
                    DeviceSpec::new(DeviceId(i as u32), self.motors_per_device).with_path(path)
                })
                .collect()
        };

        let amplitude = AmplitudeRange::new(self.amplitude.min, self.amplitude.max)?;
        let encoder = CommandEncoder::new(self.reference_hz, amplitude)?;

        Ok(ResolvedConfig {
            mode,
            allocator: AllocatorConfig {
                policy,
                release_tail: Duration::from_millis(self.release_tail_ms),
                encoder,
            },
            devices,
            scheduler: SchedulerConfig {
                min_update_interval: Duration::from_millis(self.min_update_interval_ms),
            },
            queue_capacity: self.queue_capacity,
        })
    }
}
