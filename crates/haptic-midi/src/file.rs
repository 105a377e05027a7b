//! Standard MIDI File parsing.
//!
//! Loads an SMF with `midly` and flattens every track into one list of
//! note events with absolute wall-clock offsets, honoring tempo changes.

use crate::error::Result;
use crate::event::{NoteEvent, TimedNoteEvent};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Tempo assumed until the first tempo event (120 BPM).
pub const DEFAULT_TEMPO_US_PER_BEAT: u32 = 500_000;

/// A parsed MIDI file ready for playback.
#[derive(Debug, Clone)]
pub struct ParsedMidiFile {
    /// All note events, sorted by time
    pub events: Vec<TimedNoteEvent>,

    /// Ticks per quarter note (`None` for timecode-based files)
    pub ticks_per_beat: Option<u16>,

    /// Tempo in effect at the start of the file
    pub initial_tempo_bpm: f64,

    /// Time of the last event
    pub duration: Duration,
}

/// What happens at a tick: a note event or a tempo change.
#[derive(Debug, Clone, Copy)]
enum Mark {
    Tempo(u32),
    Note(NoteEvent),
}

impl ParsedMidiFile {
    /// Load and parse a MIDI file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    /// Parse MIDI file from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let smf = Smf::parse(data)?;

        debug!(
            "Parsing MIDI file: {} tracks, timing {:?}",
            smf.tracks.len(),
            smf.header.timing
        );

        // Merge all tracks on absolute ticks; the stable sort keeps track
        // order for events on the same tick.
        let mut marks: Vec<(u64, Mark)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += u64::from(event.delta.as_int());
                if let Some(mark) = Self::convert_event(&event.kind) {
                    marks.push((tick, mark));
                }
            }
        }
        marks.sort_by_key(|(tick, _)| *tick);

        let initial_tempo = marks
            .iter()
            .take_while(|(tick, _)| *tick == 0)
            .find_map(|(_, mark)| match mark {
                Mark::Tempo(us) => Some(*us),
                Mark::Note(_) => None,
            })
            .unwrap_or(DEFAULT_TEMPO_US_PER_BEAT);

        let (events, ticks_per_beat) = match smf.header.timing {
            Timing::Metrical(tpb) => {
                let tpb = tpb.as_int();
                (Self::metrical_events(&marks, tpb), Some(tpb))
            }
            Timing::Timecode(fps, subframes) => {
                let ticks_per_second = f64::from(fps.as_f32()) * f64::from(subframes);
                (Self::timecode_events(&marks, ticks_per_second), None)
            }
        };

        let duration = events.last().map(|e| e.at).unwrap_or_default();

        debug!(
            "Parsed {} note events, duration: {:.2}s",
            events.len(),
            duration.as_secs_f64()
        );

        Ok(Self {
            events,
            ticks_per_beat,
            initial_tempo_bpm: 60_000_000.0 / f64::from(initial_tempo),
            duration,
        })
    }

    /// Convert ticks to time, re-timing at every tempo change.
    fn metrical_events(marks: &[(u64, Mark)], ticks_per_beat: u16) -> Vec<TimedNoteEvent> {
        let ticks_per_beat = f64::from(ticks_per_beat.max(1));
        let mut us_per_beat = f64::from(DEFAULT_TEMPO_US_PER_BEAT);
        let mut last_tick = 0u64;
        let mut elapsed_us = 0.0f64;
        let mut events = Vec::with_capacity(marks.len());

        for &(tick, mark) in marks {
            elapsed_us += (tick - last_tick) as f64 * us_per_beat / ticks_per_beat;
            last_tick = tick;
            match mark {
                Mark::Tempo(us) => us_per_beat = f64::from(us),
                Mark::Note(event) => events.push(TimedNoteEvent {
                    at: Duration::from_secs_f64(elapsed_us / 1_000_000.0),
                    event,
                }),
            }
        }
        events
    }

    /// SMPTE timing ignores tempo events.
    fn timecode_events(marks: &[(u64, Mark)], ticks_per_second: f64) -> Vec<TimedNoteEvent> {
        let ticks_per_second = ticks_per_second.max(1.0);
        marks
            .iter()
            .filter_map(|&(tick, mark)| match mark {
                Mark::Note(event) => Some(TimedNoteEvent {
                    at: Duration::from_secs_f64(tick as f64 / ticks_per_second),
                    event,
                }),
                Mark::Tempo(_) => None,
            })
            .collect()
    }

    fn convert_event(kind: &TrackEventKind) -> Option<Mark> {
        match kind {
            TrackEventKind::Midi { channel, message } => {
                let channel = channel.as_int();
                let event = match message {
                    // velocity 0 is treated as Note Off by the constructor
                    MidiMessage::NoteOn { key, vel } => {
                        NoteEvent::note_on(channel, key.as_int(), vel.as_int())
                    }
                    MidiMessage::NoteOff { key, .. } => NoteEvent::note_off(channel, key.as_int()),
                    MidiMessage::Controller { controller, value } => {
                        NoteEvent::control_change(channel, controller.as_int(), value.as_int())
                    }
                    _ => return None,
                };
                Some(Mark::Note(event))
            }
            TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Some(Mark::Tempo(tempo.as_int())),
            _ => None,
        }
    }

    pub fn note_on_count(&self) -> usize {
        self.events.iter().filter(|e| e.event.is_note_on()).count()
    }

    /// Largest number of notes held at once, per the file's note-on/off pairs.
    ///
    /// Useful to warn when a file needs more motors than are attached.
    pub fn max_polyphony(&self) -> usize {
        let mut held: Vec<(u8, u8)> = Vec::new();
        let mut peak = 0;
        for timed in &self.events {
            let channel = timed.event.channel;
            match timed.event.kind {
                crate::event::NoteEventKind::NoteOn { note, .. } => {
                    if !held.contains(&(channel, note)) {
                        held.push((channel, note));
                    }
                    peak = peak.max(held.len());
                }
                crate::event::NoteEventKind::NoteOff { note } => {
                    held.retain(|&key| key != (channel, note));
                }
                crate::event::NoteEventKind::AllNotesOff => held.clear(),
                _ => {}
            }
        }
        peak
    }
}
