//! File loading and playback through the public API.

use haptic_midi::{stop_channel, NoteEvent, NoteEventKind, ParsedMidiFile};
use std::time::{Duration, Instant};

/// Format 1, 96 ticks per beat, a tempo track at 240 BPM and one note track:
/// C4 on channel 0 for one beat, then E4 on channel 1 for one beat with a
/// zero-velocity note-on as its release.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[rustfmt::skip]
const TWO_TRACKS: &[u8] = &[
    // MThd, length 6, format 1, 2 tracks, 96 ticks per beat
    0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06,
    0x00, 0x01, 0x00, 0x02, 0x00, 0x60,
    // MTrk, length 11: tempo 250000 us/beat, end of track
    0x4D, 0x54, 0x72, 0x6B, 0x00, 0x00, 0x00, 0x0B,
    0x00, 0xFF, 0x51, 0x03, 0x03, 0xD0, 0x90,
    0x00, 0xFF, 0x2F, 0x00,
    // MTrk, length 20
    0x4D, 0x54, 0x72, 0x6B, 0x00, 0x00, 0x00, 0x14,
    0x00, 0x90, 0x3C, 0x64,
    0x60, 0x80, 0x3C, 0x40,
    0x00, 0x91, 0x40, 0x50,
    0x60, 0x91, 0x40, 0x00,
    0x00, 0xFF, 0x2F, 0x00,
];

#[test]
fn test_parse_merges_tracks_with_tempo() {
    let file = ParsedMidiFile::parse(TWO_TRACKS).unwrap();

    assert_eq!(file.ticks_per_beat, Some(96));
    assert!((file.initial_tempo_bpm - 240.0).abs() < 1e-9);

    let timeline: Vec<(u128, NoteEvent)> = file
        .events
        .iter()
        .map(|e| (e.at.as_millis(), e.event))
        .collect();
    assert_eq!(
        timeline,
        vec![
            (0, NoteEvent::note_on(0, 60, 100)),
            (250, NoteEvent::note_off(0, 60)),
            (250, NoteEvent::note_on(1, 64, 80)),
            (500, NoteEvent::note_off(1, 64)),
        ]
    );
    assert_eq!(file.duration, Duration::from_millis(500));
    assert_eq!(file.max_polyphony(), 1);
}

#[test]
fn test_load_from_disk() {
    let path = std::env::temp_dir().join(format!("haptic-midi-{}.mid", std::process::id()));
    std::fs::write(&path, TWO_TRACKS).unwrap();

    let file = ParsedMidiFile::load(&path).unwrap();
    assert_eq!(file.note_on_count(), 2);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_load_missing_file_is_io_error() {
    let result = ParsedMidiFile::load("/nonexistent/song.mid");
    assert!(matches!(result, Err(haptic_midi::Error::Io(_))));
}

#[test]
fn test_garbage_is_parse_error() {
    let result = ParsedMidiFile::parse(b"not a midi file");
    assert!(matches!(result, Err(haptic_midi::Error::MidiFileParse(_))));
}

#[test]
fn test_play_whole_file() {
    init_logging();
    let file = ParsedMidiFile::parse(TWO_TRACKS).unwrap();
    let (_handle, signal) = stop_channel();

    let started = Instant::now();
    let kinds: Vec<NoteEventKind> = file.play(signal).map(|e| e.event.kind).collect();

    assert_eq!(kinds.len(), 4);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[test]
fn test_stop_before_play_yields_nothing() {
    init_logging();
    let file = ParsedMidiFile::parse(TWO_TRACKS).unwrap();
    let (handle, signal) = stop_channel();
    handle.stop();

    let mut playback = file.play(signal);
    assert!(playback.next().is_none());
    assert!(playback.was_stopped());
}
