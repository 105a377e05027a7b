//! Builder for configuring and constructing a [`Session`].

use crate::config::ResolvedConfig;
use crate::error::{Error, Result};
use crate::session::{DeviceOutput, OutputSettings, Session};
use haptic_output::{DeviceSpec, SchedulerConfig, Transport, DEFAULT_QUEUE_CAPACITY};
use haptic_voice::{build_allocator, AllocatorConfig, MotorRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

/// Devices that fail to open are logged and skipped; the session is built
/// from the rest. If none open, [`build`](Self::build) fails.
///
/// # Example
///
/// ```
/// use haptic_synth::prelude::*;
/// use std::sync::Arc;
///
/// let transport = Arc::new(RecordingTransport::new());
/// let session = Session::builder(transport)
///     .device(DeviceSpec::new(DeviceId(0), 2))
///     .device(DeviceSpec::new(DeviceId(1), 2))
///     .build()?;
///
/// assert_eq!(session.total_motor_count(), 4);
/// session.shutdown();
/// # Ok::<(), haptic_synth::Error>(())
/// ```
pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    devices: Vec<DeviceSpec>,
    allocator: AllocatorConfig,
    scheduler: SchedulerConfig,
    queue_capacity: usize,
}

impl SessionBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            devices: Vec::new(),
            allocator: AllocatorConfig::default(),
            scheduler: SchedulerConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Take devices, allocator and output settings from a resolved config.
    pub fn config(mut self, config: &ResolvedConfig) -> Self {
        self.devices = config.devices.clone();
        self.allocator = config.allocator.clone();
        self.scheduler = config.scheduler;
        self.queue_capacity = config.queue_capacity;
        self
    }

    pub fn device(mut self, spec: DeviceSpec) -> Self {
        self.devices.push(spec);
        self
    }

    pub fn allocator(mut self, config: AllocatorConfig) -> Self {
        self.allocator = config;
        self
    }

    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Default: 64
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<Session> {
        let mut registry = MotorRegistry::new();
        let mut outputs = BTreeMap::new();

        for spec in &self.devices {
            if let Err(e) = registry.attach_device(spec.id, spec.motors) {
                error!(device = %spec.id, "Skipping device: {e}");
                continue;
            }
            match DeviceOutput::open(
                self.transport.as_ref(),
                spec,
                self.scheduler,
                self.queue_capacity,
            ) {
                Ok(output) => {
                    outputs.insert(spec.id, output);
                }
                Err(e) => {
                    error!(device = %spec.id, "Failed to open device: {e}");
                    registry.detach_device(spec.id)?;
                }
            }
        }

        if registry.device_count() == 0 {
            return Err(Error::NoDevices);
        }

        info!(
            devices = registry.device_count(),
            motors = registry.total_motor_count(),
            policy = %self.allocator.policy,
            transport = self.transport.name(),
            "Session ready"
        );

        // Single-voice channel maps are built from the registry as it is now
        let allocator = build_allocator(&registry, self.allocator);
        Ok(Session::from_parts(
            registry,
            allocator,
            outputs,
            OutputSettings {
                transport: self.transport,
                scheduler: self.scheduler,
                queue_capacity: self.queue_capacity,
            },
        ))
    }
}
