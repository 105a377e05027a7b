//! Live MIDI input via midir.
//!
//! The midir callback decodes each message and hands it to a bounded
//! channel; the session thread receives from the other end.

use crate::error::{Error, Result};
use crate::event::NoteEvent;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TrySendError};
use midir::{MidiInput, MidiInputConnection};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Events buffered between the midir thread and the consumer.
pub const INPUT_QUEUE_CAPACITY: usize = 1024;

/// Information about an available MIDI input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiInputDevice {
    /// Device index (for connection)
    pub index: usize,
    /// Device name
    pub name: String,
}

/// List input ports. Empty if the MIDI backend is unavailable.
pub fn list_input_ports() -> Vec<MidiInputDevice> {
    let Ok(midi_input) = MidiInput::new("haptic-synth-device-list") else {
        return Vec::new();
    };
    midi_input
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| MidiInputDevice {
            index,
            name: midi_input
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {index}")),
        })
        .collect()
}

/// Pick a port: a numeric selector is an index, anything else matches a
/// case-insensitive name substring. No selector takes the first port.
fn select_port(ports: &[MidiInputDevice], selector: Option<&str>) -> Result<usize> {
    let Some(selector) = selector else {
        return ports
            .first()
            .map(|d| d.index)
            .ok_or(Error::NoInputPorts);
    };

    if let Ok(index) = selector.parse::<usize>() {
        return ports
            .iter()
            .find(|d| d.index == index)
            .map(|d| d.index)
            .ok_or_else(|| Error::InputNotFound(selector.to_string()));
    }

    let needle = selector.to_lowercase();
    ports
        .iter()
        .find(|d| d.name.to_lowercase().contains(&needle))
        .map(|d| d.index)
        .ok_or_else(|| Error::InputNotFound(selector.to_string()))
}

/// An open MIDI input. Dropping it closes the port.
pub struct LiveInput {
    name: String,
    receiver: Receiver<NoteEvent>,
    _connection: MidiInputConnection<()>,
}

impl LiveInput {
    pub fn open(selector: Option<&str>) -> Result<Self> {
        let midi_input = MidiInput::new("haptic-synth-input")?;
        let ports = midi_input.ports();
        let devices: Vec<MidiInputDevice> = ports
            .iter()
            .enumerate()
            .map(|(index, port)| MidiInputDevice {
                index,
                name: midi_input
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Device {index}")),
            })
            .collect();

        let index = select_port(&devices, selector)?;
        let name = devices[index].name.clone();
        let port = ports.get(index).ok_or_else(|| Error::Input {
            port: name.clone(),
            reason: "port disappeared".to_string(),
        })?;

        let (tx, rx) = bounded(INPUT_QUEUE_CAPACITY);
        let connection = midi_input
            .connect(
                port,
                "haptic-synth-input",
                move |_timestamp, message, _| match NoteEvent::from_bytes(message) {
                    Ok(Some(event)) => match tx.try_send(event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("MIDI input queue full, dropping event");
                        }
                        Err(TrySendError::Disconnected(_)) => {}
                    },
                    Ok(None) => {}
                    Err(e) => debug!("Failed to parse MIDI event: {e}"),
                },
                (),
            )
            .map_err(|e| Error::Input {
                port: name.clone(),
                reason: e.to_string(),
            })?;

        info!("Listening on MIDI input '{name}'");
        Ok(Self {
            name,
            receiver: rx,
            _connection: connection,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver(&self) -> &Receiver<NoteEvent> {
        &self.receiver
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// `Ok(None)` on timeout; an error once the port is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<NoteEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Input {
                port: self.name.clone(),
                reason: "disconnected".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> Vec<MidiInputDevice> {
        ["Midi Through Port-0", "Arturia KeyStep 32", "LoopBe Internal"]
            .iter()
            .enumerate()
            .map(|(index, name)| MidiInputDevice {
                index,
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_select_by_name_substring() {
        assert_eq!(select_port(&ports(), Some("keystep")).unwrap(), 1);
    }

    #[test]
    fn test_select_by_index() {
        assert_eq!(select_port(&ports(), Some("2")).unwrap(), 2);
        assert!(select_port(&ports(), Some("7")).is_err());
    }

    #[test]
    fn test_select_default_and_empty() {
        assert_eq!(select_port(&ports(), None).unwrap(), 0);
        assert!(matches!(select_port(&[], None), Err(Error::NoInputPorts)));
        assert!(matches!(
            select_port(&ports(), Some("nonexistent")),
            Err(Error::InputNotFound(_))
        ));
    }

    #[test]
    fn test_list_input_ports() {
        // Availability depends on the system; just must not panic
        let ports = list_input_ports();
        println!("Found {} MIDI inputs", ports.len());
    }
}
