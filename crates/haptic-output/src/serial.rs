//! Serial-port transport.
//!
//! Each device is a USB serial adapter that accepts raw 64-byte reports.

use crate::error::{Error, Result};
use crate::transport::{DeviceLink, DeviceSpec, Transport};
use haptic_voice::DeviceId;
use serialport::SerialPort;
use std::io::Write;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone)]
pub struct SerialTransport {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialTransport {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            timeout: Duration::from_millis(100),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// USB serial ports visible on this machine.
    pub fn usb_ports() -> Result<Vec<String>> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|port| port.port_name)
            .filter(|name| name.contains("USB") || name.contains("usb") || name.contains("COM"))
            .collect())
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        "serial"
    }

    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn DeviceLink>> {
        let path = spec.path.as_deref().ok_or_else(|| Error::Open {
            device: spec.id,
            reason: "no serial port path".to_string(),
        })?;

        let port = serialport::new(path, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| Error::Open {
                device: spec.id,
                reason: format!("{path}: {e}"),
            })?;

        info!(device = %spec.id, "Opened serial port {path}");
        Ok(Box::new(SerialLink {
            device: spec.id,
            port,
        }))
    }
}

struct SerialLink {
    device: DeviceId,
    port: Box<dyn SerialPort>,
}

impl DeviceLink for SerialLink {
    fn device(&self) -> DeviceId {
        self.device
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
