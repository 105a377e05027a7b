//! Wire format for motor updates.
//!
//! A frame is one 64-byte report:
//!
//! ```text
//! [0x8F, count, record * count, zero padding]
//! record = [slot, high_lo, high_hi, low_lo, low_hi, repeat_lo, repeat_hi, 0]
//! ```
//!
//! `high`/`low` are the pulse widths of one drive cycle in device units and
//! `repeat` is the number of cycles to play (`0x7FFF` keeps going until the
//! next update). All-zero timing stops the motor.
//!
//! The batched layout is this crate's own framing between the scheduler and
//! its transports. The controller itself takes one record per report, with
//! byte 1 fixed at the payload length; see [`controller_report`].

use crate::error::{Error, Result};
use haptic_voice::{Command, DriveHint};
use smallvec::SmallVec;

/// Size of every report on the wire.
pub const REPORT_LEN: usize = 64;

/// First byte of a motor-update report.
pub const REPORT_ID: u8 = 0x8F;

pub const RECORD_LEN: usize = 8;

/// Records that fit after the two header bytes.
pub const MAX_RECORDS: usize = (REPORT_LEN - 2) / RECORD_LEN;

/// Device units per second of drive period.
pub const PERIOD_RATIO: f64 = 495_483.0;

/// Repeat count meaning "until the next update".
pub const REPEAT_SUSTAIN: u16 = 0x7FFF;

/// Byte 1 of a single-record controller report.
pub const CONTROLLER_PAYLOAD_LEN: u8 = 0x07;

/// One encoded report.
pub type Frame = [u8; REPORT_LEN];

/// Timing for a single motor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorRecord {
    pub slot: u8,
    pub high: u16,
    pub low: u16,
    pub repeat: u16,
}

impl MotorRecord {
    pub const fn silence(slot: u8) -> Self {
        Self {
            slot,
            high: 0,
            low: 0,
            repeat: 0,
        }
    }

    pub fn is_silence(&self) -> bool {
        self.high == 0 && self.low == 0
    }

    pub fn from_command(command: &Command) -> Self {
        let slot = command.motor.slot;
        if command.is_silence() {
            return Self::silence(slot);
        }

        let frequency = f64::from(command.frequency_hz);
        let amplitude = f64::from(command.amplitude.clamp(0.0, 1.0));
        let period_units = PERIOD_RATIO / frequency;
        let high = period_units * amplitude;
        let low = 2.0 * period_units - high;

        let repeat = match command.hint {
            DriveHint::Sustain => REPEAT_SUSTAIN,
            DriveHint::For(duration) => {
                let cycles = (duration.as_secs_f64() * frequency).round();
                cycles.clamp(1.0, f64::from(REPEAT_SUSTAIN - 1)) as u16
            }
        };

        Self {
            slot,
            high: saturate(high),
            low: saturate(low),
            repeat,
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        let [high_lo, high_hi] = self.high.to_le_bytes();
        let [low_lo, low_hi] = self.low.to_le_bytes();
        let [repeat_lo, repeat_hi] = self.repeat.to_le_bytes();
        out.copy_from_slice(&[
            self.slot, high_lo, high_hi, low_lo, low_hi, repeat_lo, repeat_hi, 0,
        ]);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let word = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        Self {
            slot: bytes[0],
            high: word(1),
            low: word(3),
            repeat: word(5),
        }
    }

    /// Drive frequency this record plays, or `None` for silence.
    pub fn frequency_hz(&self) -> Option<f64> {
        let cycle = u32::from(self.high) + u32::from(self.low);
        (cycle > 0).then(|| 2.0 * PERIOD_RATIO / f64::from(cycle))
    }
}

fn saturate(units: f64) -> u16 {
    units.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Pack records into as few reports as possible, in order.
pub fn encode_frames(records: &[MotorRecord]) -> SmallVec<[Frame; 2]> {
    records
        .chunks(MAX_RECORDS)
        .map(|chunk| {
            let mut frame = [0u8; REPORT_LEN];
            frame[0] = REPORT_ID;
            frame[1] = chunk.len() as u8;
            for (i, record) in chunk.iter().enumerate() {
                let start = 2 + i * RECORD_LEN;
                record.write_to(&mut frame[start..start + RECORD_LEN]);
            }
            frame
        })
        .collect()
}

/// The report a Steam Controller expects for one record:
/// `[0x8F, 0x07, slot, high, low, repeat, zero padding]`.
pub fn controller_report(record: &MotorRecord) -> Frame {
    let mut report = [0u8; REPORT_LEN];
    report[0] = REPORT_ID;
    report[1] = CONTROLLER_PAYLOAD_LEN;
    record.write_to(&mut report[2..2 + RECORD_LEN]);
    report
}

/// Parse a report back into its records.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<MotorRecord>> {
    if frame.len() != REPORT_LEN {
        return Err(Error::MalformedFrame(format!(
            "expected {REPORT_LEN} bytes, got {}",
            frame.len()
        )));
    }
    if frame[0] != REPORT_ID {
        return Err(Error::MalformedFrame(format!(
            "unknown report id {:#04x}",
            frame[0]
        )));
    }
    let count = usize::from(frame[1]);
    if count > MAX_RECORDS {
        return Err(Error::MalformedFrame(format!("{count} records in one report")));
    }

    Ok(frame[2..2 + count * RECORD_LEN]
        .chunks_exact(RECORD_LEN)
        .map(MotorRecord::read_from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use haptic_voice::{DeviceId, MotorId};
    use std::time::Duration;

    fn command(slot: u8, frequency_hz: f32, amplitude: f32, hint: DriveHint) -> Command {
        Command {
            motor: MotorId::new(DeviceId(0), slot),
            voice: Some(1),
            frequency_hz,
            amplitude,
            hint,
        }
    }

    #[test]
    fn test_full_amplitude_is_square_wave() {
        let record = MotorRecord::from_command(&command(1, 440.0, 1.0, DriveHint::Sustain));
        // 495483 / 440 = 1126.1
        assert_eq!(record.high, 1126);
        assert_eq!(record.low, 1126);
        assert_eq!(record.repeat, REPEAT_SUSTAIN);
        assert_eq!(record.slot, 1);

        let hz = record.frequency_hz().unwrap();
        assert!((hz - 440.0).abs() < 0.5);
    }

    #[test]
    fn test_controller_report_layout() {
        let record = MotorRecord {
            slot: 1,
            high: 0x0466,
            low: 0x0466,
            repeat: REPEAT_SUSTAIN,
        };
        let report = controller_report(&record);

        assert_eq!(
            &report[..9],
            &[0x8F, 0x07, 0x01, 0x66, 0x04, 0x66, 0x04, 0xFF, 0x7F]
        );
        assert!(report[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_amplitude_sets_duty_not_pitch() {
        let record = MotorRecord::from_command(&command(0, 440.0, 0.5, DriveHint::Sustain));
        assert!(record.high < record.low);
        let hz = record.frequency_hz().unwrap();
        assert!((hz - 440.0).abs() < 0.5);
    }

    #[test]
    fn test_duration_hint_sets_repeat() {
        let hint = DriveHint::For(Duration::from_millis(500));
        let record = MotorRecord::from_command(&command(0, 440.0, 1.0, hint));
        assert_eq!(record.repeat, 220);

        let long = DriveHint::For(Duration::from_secs(600));
        let record = MotorRecord::from_command(&command(0, 440.0, 1.0, long));
        assert_eq!(record.repeat, REPEAT_SUSTAIN - 1);
    }

    #[test]
    fn test_silence_encodes_zero_timing() {
        let silence = Command::silence(MotorId::new(DeviceId(0), 1));
        let record = MotorRecord::from_command(&silence);
        assert_eq!(record, MotorRecord::silence(1));
        assert!(record.frequency_hz().is_none());
    }

    #[test]
    fn test_low_notes_saturate() {
        let record = MotorRecord::from_command(&command(0, 8.0, 0.1, DriveHint::Sustain));
        assert_eq!(record.low, u16::MAX);
    }

    #[test]
    fn test_frame_layout() {
        let records = [
            MotorRecord {
                slot: 0,
                high: 0x0466,
                low: 0x0466,
                repeat: REPEAT_SUSTAIN,
            },
            MotorRecord::silence(1),
        ];
        let frames = encode_frames(&records);
        assert_eq!(frames.len(), 1);

        let frame = &frames[0];
        assert_eq!(&frame[..10], &[0x8F, 2, 0, 0x66, 0x04, 0x66, 0x04, 0xFF, 0x7F, 0]);
        assert_eq!(&frame[10..18], &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert!(frame[18..].iter().all(|&b| b == 0));

        assert_eq!(decode_frame(frame).unwrap(), records.to_vec());
    }

    #[test]
    fn test_large_batches_split() {
        let records: Vec<_> = (0..9).map(MotorRecord::silence).collect();
        let frames = encode_frames(&records);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][1], 7);
        assert_eq!(frames[1][1], 2);
        assert!(encode_frames(&[]).is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_frame(&[0x8F, 1]).is_err());
        let mut frame = [0u8; REPORT_LEN];
        assert!(decode_frame(&frame).is_err());
        frame[0] = REPORT_ID;
        frame[1] = 8;
        assert!(decode_frame(&frame).is_err());
    }
}
