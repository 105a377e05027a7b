//! Flat catalog of every motor on every attached device.
//!
//! Motors are kept in attach order, then slot order. That ordering is what
//! the allocators see: "first free motor" and the single-voice channel map
//! both follow it.
//!
//! The registry is not synchronized. It is owned by whoever owns the
//! allocator and mutated only under that owner's lock.

use crate::command::{Command, DeviceId, MotorId};
use crate::error::{Error, Result};
use crate::voice::VoiceId;
use tracing::debug;

/// Whether a motor currently carries a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Occupancy {
    #[default]
    Free,
    Bound(VoiceId),
}

/// One physical actuator.
#[derive(Debug, Clone)]
pub struct Motor {
    id: MotorId,
    occupancy: Occupancy,
    last_sent: Option<Command>,
}

impl Motor {
    fn new(id: MotorId) -> Self {
        Self {
            id,
            occupancy: Occupancy::Free,
            last_sent: None,
        }
    }

    pub fn id(&self) -> MotorId {
        self.id
    }

    pub fn occupancy(&self) -> Occupancy {
        self.occupancy
    }

    pub fn is_free(&self) -> bool {
        self.occupancy == Occupancy::Free
    }

    pub fn bound_voice(&self) -> Option<VoiceId> {
        match self.occupancy {
            Occupancy::Bound(id) => Some(id),
            Occupancy::Free => None,
        }
    }

    /// Last command accepted for output on this motor.
    pub fn last_sent(&self) -> Option<&Command> {
        self.last_sent.as_ref()
    }
}

#[derive(Debug, Clone, Copy)]
struct DeviceEntry {
    id: DeviceId,
    motor_count: u8,
}

/// Ordered pool of motors across all attached devices.
#[derive(Debug, Clone, Default)]
pub struct MotorRegistry {
    motors: Vec<Motor>,
    devices: Vec<DeviceEntry>,
}

impl MotorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device's motors to the end of the pool.
    pub fn attach_device(&mut self, device: DeviceId, motor_count: u8) -> Result<()> {
        if motor_count == 0 {
            return Err(Error::InvalidConfig(format!(
                "device {device} exposes no motors"
            )));
        }
        if self.devices.iter().any(|d| d.id == device) {
            return Err(Error::DuplicateDevice(device));
        }

        self.devices.push(DeviceEntry {
            id: device,
            motor_count,
        });
        self.motors
            .extend((0..motor_count).map(|slot| Motor::new(MotorId::new(device, slot))));

        debug!(
            "Attached {} with {} motors ({} total)",
            device,
            motor_count,
            self.motors.len()
        );
        Ok(())
    }

    /// Remove a device and return its motors as they were at removal.
    ///
    /// The caller is responsible for force-releasing any voice still bound
    /// to the returned motors.
    pub fn detach_device(&mut self, device: DeviceId) -> Result<Vec<Motor>> {
        let index = self
            .devices
            .iter()
            .position(|d| d.id == device)
            .ok_or(Error::UnknownDevice(device))?;
        self.devices.remove(index);

        let (removed, kept): (Vec<Motor>, Vec<Motor>) = std::mem::take(&mut self.motors)
            .into_iter()
            .partition(|m| m.id.device == device);
        self.motors = kept;

        debug!(
            "Detached {} ({} motors removed, {} remain)",
            device,
            removed.len(),
            self.motors.len()
        );
        Ok(removed)
    }

    pub fn total_motor_count(&self) -> usize {
        self.motors.len()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Attached devices in attach order.
    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.iter().map(|d| d.id)
    }

    pub fn motors_on(&self, device: DeviceId) -> Option<u8> {
        self.devices
            .iter()
            .find(|d| d.id == device)
            .map(|d| d.motor_count)
    }

    pub fn motors(&self) -> &[Motor] {
        &self.motors
    }

    pub fn iterate_free(&self) -> impl Iterator<Item = &Motor> + '_ {
        self.motors.iter().filter(|m| m.is_free())
    }

    pub fn free_count(&self) -> usize {
        self.iterate_free().count()
    }

    pub fn get(&self, motor: MotorId) -> Option<&Motor> {
        self.motors.iter().find(|m| m.id == motor)
    }

    pub fn contains(&self, motor: MotorId) -> bool {
        self.get(motor).is_some()
    }

    /// Bind `voice` to `motor`. Returns `false` if the motor is unknown.
    pub fn mark_bound(&mut self, motor: MotorId, voice: VoiceId) -> bool {
        match self.get_mut(motor) {
            Some(m) => {
                debug_assert!(
                    m.occupancy == Occupancy::Free || m.occupancy == Occupancy::Bound(voice),
                    "motor {motor} already carries another voice"
                );
                m.occupancy = Occupancy::Bound(voice);
                true
            }
            None => false,
        }
    }

    /// Return `motor` to the free pool. Returns `false` if the motor is unknown.
    pub fn mark_free(&mut self, motor: MotorId) -> bool {
        match self.get_mut(motor) {
            Some(m) => {
                m.occupancy = Occupancy::Free;
                true
            }
            None => false,
        }
    }

    /// Remember `command` as the motor's current output state.
    ///
    /// Returns `false` when the motor already has an identical drive pending
    /// or sent, meaning the command can be skipped. Commands for unknown
    /// motors are also rejected.
    pub fn record_sent(&mut self, command: &Command) -> bool {
        let Some(m) = self.get_mut(command.motor) else {
            return false;
        };
        if let Some(previous) = &m.last_sent {
            if previous.same_drive(command) {
                return false;
            }
        }
        m.last_sent = Some(*command);
        true
    }

    /// Drop the remembered output state of every motor on `device`, so the
    /// next command for each is sent even if it repeats the last one.
    ///
    /// Used after a failed write, when the device may not hold what was
    /// recorded.
    pub fn forget_sent(&mut self, device: DeviceId) {
        for m in self.motors.iter_mut().filter(|m| m.id.device == device) {
            m.last_sent = None;
        }
    }

    fn get_mut(&mut self, motor: MotorId) -> Option<&mut Motor> {
        self.motors.iter_mut().find(|m| m.id == motor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DriveHint;

    fn registry(devices: &[(u32, u8)]) -> MotorRegistry {
        let mut reg = MotorRegistry::new();
        for &(id, count) in devices {
            reg.attach_device(DeviceId(id), count).unwrap();
        }
        reg
    }

    #[test]
    fn test_attach_appends_in_order() {
        let reg = registry(&[(0, 2), (1, 2)]);
        assert_eq!(reg.total_motor_count(), 4);

        let ids: Vec<_> = reg.motors().iter().map(|m| m.id()).collect();
        assert_eq!(
            ids,
            vec![
                MotorId::new(DeviceId(0), 0),
                MotorId::new(DeviceId(0), 1),
                MotorId::new(DeviceId(1), 0),
                MotorId::new(DeviceId(1), 1),
            ]
        );
    }

    #[test]
    fn test_duplicate_and_empty_devices_rejected() {
        let mut reg = registry(&[(0, 2)]);
        assert!(matches!(
            reg.attach_device(DeviceId(0), 2),
            Err(Error::DuplicateDevice(DeviceId(0)))
        ));
        assert!(matches!(
            reg.attach_device(DeviceId(1), 0),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(reg.total_motor_count(), 2);
    }

    #[test]
    fn test_bind_and_free() {
        let mut reg = registry(&[(0, 2)]);
        let motor = MotorId::new(DeviceId(0), 1);

        assert!(reg.mark_bound(motor, 7));
        assert_eq!(reg.get(motor).unwrap().bound_voice(), Some(7));
        assert_eq!(reg.free_count(), 1);

        assert!(reg.mark_free(motor));
        assert_eq!(reg.free_count(), 2);

        assert!(!reg.mark_bound(MotorId::new(DeviceId(9), 0), 1));
    }

    #[test]
    fn test_detach_returns_bound_motors() {
        let mut reg = registry(&[(0, 2), (1, 2)]);
        reg.mark_bound(MotorId::new(DeviceId(1), 0), 3);

        let removed = reg.detach_device(DeviceId(1)).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].bound_voice(), Some(3));
        assert_eq!(reg.total_motor_count(), 2);
        assert_eq!(reg.device_count(), 1);

        assert!(matches!(
            reg.detach_device(DeviceId(1)),
            Err(Error::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_record_sent_dedups() {
        let mut reg = registry(&[(0, 1)]);
        let cmd = Command {
            motor: MotorId::new(DeviceId(0), 0),
            voice: Some(1),
            frequency_hz: 220.0,
            amplitude: 1.0,
            hint: DriveHint::Sustain,
        };

        assert!(reg.record_sent(&cmd));
        assert!(!reg.record_sent(&cmd));
        assert!(reg.record_sent(&Command::silence(cmd.motor)));
        assert!(!reg.record_sent(&Command::silence(cmd.motor)));
    }

    #[test]
    fn test_forget_sent_only_touches_one_device() {
        let mut reg = registry(&[(0, 1), (1, 1)]);
        let left = Command::silence(MotorId::new(DeviceId(0), 0));
        let right = Command::silence(MotorId::new(DeviceId(1), 0));
        reg.record_sent(&left);
        reg.record_sent(&right);

        reg.forget_sent(DeviceId(0));

        assert!(reg.get(left.motor).unwrap().last_sent().is_none());
        assert!(reg.get(right.motor).unwrap().last_sent().is_some());
        assert!(reg.record_sent(&left));
        assert!(!reg.record_sent(&right));
    }
}
