//! Steam Controller transport over raw USB.
//!
//! Wired controllers are found by vendor/product id and driven through HID
//! feature reports on interface 2. Every record of a batched frame becomes
//! one [`controller_report`].

use crate::error::{Error, Result};
use crate::frame::{controller_report, decode_frame};
use crate::transport::{DeviceLink, DeviceSpec, Transport};
use haptic_voice::DeviceId;
use rusb::{Device, DeviceHandle, GlobalContext};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const STEAM_VENDOR_ID: u16 = 0x28DE;
pub const WIRED_CONTROLLER_PRODUCT_ID: u16 = 0x1102;

/// Interface carrying the haptic feature reports.
const HAPTIC_INTERFACE: u8 = 2;

// HID SET_REPORT (feature report 0) to the haptic interface
const REQUEST_TYPE: u8 = 0x21;
const SET_REPORT: u8 = 0x09;
const FEATURE_REPORT: u16 = 0x0300;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens wired Steam Controllers.
///
/// A [`DeviceSpec`] with a `"bus:address"` path selects that controller;
/// without one, device `n` is the `n`-th controller found.
#[derive(Debug, Clone)]
pub struct SteamControllerTransport {
    timeout: Duration,
}

impl SteamControllerTransport {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `"bus:address"` of every wired controller, in enumeration order.
    pub fn list() -> Result<Vec<String>> {
        Ok(controllers()?
            .iter()
            .map(|d| format!("{}:{}", d.bus_number(), d.address()))
            .collect())
    }
}

impl Default for SteamControllerTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn controllers() -> Result<Vec<Device<GlobalContext>>> {
    Ok(rusb::devices()?
        .iter()
        .filter(|device| {
            device.device_descriptor().is_ok_and(|desc| {
                desc.vendor_id() == STEAM_VENDOR_ID
                    && desc.product_id() == WIRED_CONTROLLER_PRODUCT_ID
            })
        })
        .collect())
}

fn parse_bus_address(path: &str) -> Option<(u8, u8)> {
    let (bus, address) = path.split_once(':')?;
    Some((bus.trim().parse().ok()?, address.trim().parse().ok()?))
}

fn select(spec: &DeviceSpec, found: Vec<Device<GlobalContext>>) -> Result<Device<GlobalContext>> {
    let open_error = |reason: String| Error::Open {
        device: spec.id,
        reason,
    };

    match spec.path.as_deref() {
        Some(path) => {
            let (bus, address) = parse_bus_address(path)
                .ok_or_else(|| open_error(format!("'{path}' is not bus:address")))?;
            found
                .into_iter()
                .find(|d| d.bus_number() == bus && d.address() == address)
                .ok_or_else(|| open_error(format!("no Steam Controller at {path}")))
        }
        None => {
            let index = spec.id.0 as usize;
            let count = found.len();
            found
                .into_iter()
                .nth(index)
                .ok_or_else(|| open_error(format!("{count} Steam Controllers connected")))
        }
    }
}

impl Transport for SteamControllerTransport {
    fn name(&self) -> &str {
        "steam-controller"
    }

    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn DeviceLink>> {
        let device = select(spec, controllers()?)?;
        let location = format!("{}:{}", device.bus_number(), device.address());
        let open_error = |e: rusb::Error| Error::Open {
            device: spec.id,
            reason: format!("{location}: {e}"),
        };

        let mut handle = device.open().map_err(open_error)?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!(device = %spec.id, "Kernel driver auto-detach unavailable: {e}");
        }
        handle.claim_interface(HAPTIC_INTERFACE).map_err(open_error)?;

        info!(device = %spec.id, "Claimed Steam Controller at {location}");
        Ok(Box::new(SteamControllerLink {
            device: spec.id,
            handle,
            timeout: self.timeout,
        }))
    }
}

struct SteamControllerLink {
    device: DeviceId,
    handle: DeviceHandle<GlobalContext>,
    timeout: Duration,
}

impl DeviceLink for SteamControllerLink {
    fn device(&self) -> DeviceId {
        self.device
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        for record in decode_frame(frame)? {
            self.handle
                .write_control(
                    REQUEST_TYPE,
                    SET_REPORT,
                    FEATURE_REPORT,
                    u16::from(HAPTIC_INTERFACE),
                    &controller_report(&record),
                    self.timeout,
                )
                .map_err(|e| Error::Write {
                    device: self.device,
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self {
            device, mut handle, ..
        } = *self;
        if let Err(e) = handle.release_interface(HAPTIC_INTERFACE) {
            warn!(%device, "Failed to release interface: {e}");
        }
        handle.reset()?;
        debug!(%device, "Steam Controller released");
        Ok(())
    }
}
