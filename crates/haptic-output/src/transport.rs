//! Device transport contract and the in-process implementations.
//!
//! The scheduler only sees [`Transport`] and [`DeviceLink`]. Real hardware
//! goes through `SerialTransport` (feature `serial`); tests use
//! [`RecordingTransport`] and dry runs use [`LogTransport`].

use crate::error::{Error, Result};
use crate::frame::{decode_frame, MotorRecord};
use haptic_voice::DeviceId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything needed to open one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub id: DeviceId,
    /// Transport-specific address (serial port path, ...)
    pub path: Option<String>,
    pub motors: u8,
}

impl DeviceSpec {
    pub fn new(id: DeviceId, motors: u8) -> Self {
        Self {
            id,
            path: None,
            motors,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Opens device links.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn DeviceLink>>;
}

/// An open connection to one device.
pub trait DeviceLink: Send {
    fn device(&self) -> DeviceId;

    /// Write one complete frame.
    fn write(&mut self, frame: &[u8]) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Recording {
    frames: HashMap<DeviceId, Vec<Vec<u8>>>,
    opened: Vec<DeviceId>,
    closed: Vec<DeviceId>,
    fail_open: HashSet<DeviceId>,
    fail_write: HashSet<DeviceId>,
}

/// Keeps every written frame in memory.
///
/// Clones share the same recording, so a test can keep one handle while the
/// session owns another. Failures can be injected per device.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail for this device.
    pub fn fail_open(&self, device: DeviceId) {
        self.inner.lock().fail_open.insert(device);
    }

    /// Make every write to this device fail (or succeed again).
    pub fn set_fail_writes(&self, device: DeviceId, fail: bool) {
        let mut inner = self.inner.lock();
        if fail {
            inner.fail_write.insert(device);
        } else {
            inner.fail_write.remove(&device);
        }
    }

    pub fn frames(&self, device: DeviceId) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .frames
            .get(&device)
            .cloned()
            .unwrap_or_default()
    }

    /// Every record written to `device`, decoded, in write order.
    pub fn records(&self, device: DeviceId) -> Vec<MotorRecord> {
        self.frames(device)
            .iter()
            .filter_map(|frame| decode_frame(frame).ok())
            .flatten()
            .collect()
    }

    /// Last record written for one motor slot.
    pub fn last_record(&self, device: DeviceId, slot: u8) -> Option<MotorRecord> {
        self.records(device).into_iter().rev().find(|r| r.slot == slot)
    }

    pub fn opened(&self) -> Vec<DeviceId> {
        self.inner.lock().opened.clone()
    }

    pub fn closed(&self) -> Vec<DeviceId> {
        self.inner.lock().closed.clone()
    }

    pub fn clear(&self) {
        self.inner.lock().frames.clear();
    }
}

impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn DeviceLink>> {
        let mut inner = self.inner.lock();
        if inner.fail_open.contains(&spec.id) {
            return Err(Error::Open {
                device: spec.id,
                reason: "injected failure".to_string(),
            });
        }
        inner.opened.push(spec.id);
        Ok(Box::new(RecordingLink {
            device: spec.id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct RecordingLink {
    device: DeviceId,
    inner: Arc<Mutex<Recording>>,
}

impl DeviceLink for RecordingLink {
    fn device(&self) -> DeviceId {
        self.device
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_write.contains(&self.device) {
            return Err(Error::Write {
                device: self.device,
                reason: "injected failure".to_string(),
            });
        }
        inner
            .frames
            .entry(self.device)
            .or_default()
            .push(frame.to_vec());
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.inner.lock().closed.push(self.device);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logs decoded frames instead of touching hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn DeviceLink>> {
        info!(device = %spec.id, motors = spec.motors, "Opened dry-run device");
        Ok(Box::new(LogLink { device: spec.id }))
    }
}

struct LogLink {
    device: DeviceId,
}

impl DeviceLink for LogLink {
    fn device(&self) -> DeviceId {
        self.device
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        for record in decode_frame(frame)? {
            match record.frequency_hz() {
                Some(hz) => debug!(
                    device = %self.device,
                    slot = record.slot,
                    repeat = record.repeat,
                    "drive {hz:.1} Hz"
                ),
                None => debug!(device = %self.device, slot = record.slot, "silence"),
            }
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        info!(device = %self.device, "Closed dry-run device");
        Ok(())
    }
}
