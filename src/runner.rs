//! Drives a session from an event source until it ends or is stopped.

use crate::error::Result;
use crate::session::Session;
use haptic_midi::{note_name, stop_channel, NoteEvent, ParsedMidiFile, StopHandle, StopSignal};
use haptic_voice::{Allocation, AllocatorPolicy};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Spacing of release-clock ticks.
pub const RELEASE_CLOCK_INTERVAL: Duration = Duration::from_millis(1);

/// Calls [`Session::tick`] on its own thread so release tails end on time
/// even when no events arrive.
pub struct ReleaseClock {
    stop: StopHandle,
    handle: Option<JoinHandle<()>>,
}

impl ReleaseClock {
    pub fn start(session: Arc<Session>, interval: Duration) -> Result<Self> {
        let (stop, signal) = stop_channel();
        let handle = thread::Builder::new()
            .name("haptic-release-clock".to_string())
            .spawn(move || {
                while !signal.wait(interval) {
                    session.tick(Instant::now());
                }
                debug!("Release clock stopped");
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Release clock thread panicked");
            }
        }
    }
}

impl Drop for ReleaseClock {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// What happened during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub events: usize,
    pub notes: usize,
    pub stolen: usize,
    /// Note-ons with no motor to play on
    pub dropped: usize,
    /// Ended by a stop request rather than running out of events
    pub stopped: bool,
}

impl RunReport {
    fn record(&mut self, allocation: Option<Allocation>) {
        self.events += 1;
        match allocation {
            Some(Allocation::Allocated { .. }) | Some(Allocation::Retriggered { .. }) => {
                self.notes += 1;
            }
            Some(Allocation::Stolen { .. }) => {
                self.notes += 1;
                self.stolen += 1;
            }
            Some(Allocation::Dropped) => self.dropped += 1,
            Some(Allocation::Released) | None => {}
        }
    }
}

/// Play a parsed file in real time. A stop request silences every motor
/// immediately.
pub fn run_file(session: &Session, file: &ParsedMidiFile, stop: StopSignal) -> RunReport {
    let motors = session.total_motor_count();
    let needed = file.max_polyphony();
    if session.policy() == AllocatorPolicy::Polyphony && needed > motors {
        warn!(
            "File holds up to {needed} notes at once but only {motors} motors are available; \
             voices will be stolen"
        );
    }
    info!(
        "Playing {} events over {:.1}s",
        file.events.len(),
        file.duration.as_secs_f64()
    );

    let mut report = RunReport::default();
    let mut playback = file.play(stop);
    for timed in playback.by_ref() {
        let allocation = session.handle_event(&timed.event, Instant::now());
        report.record(allocation);
    }
    report.stopped = playback.was_stopped();

    if report.stopped {
        info!("Playback stopped");
    }
    session.silence_all();
    report
}

/// Highest note the tuning sweep plays.
pub const TUNE_LAST_NOTE: u8 = 127;

/// Step one motor through every MIDI note at full velocity for calibration.
///
/// Each note sustains until `advance` returns; returning `false` ends the
/// sweep early. Motors are silenced between notes so every note lands on
/// the first motor of the first device.
pub fn run_tune(
    session: &Session,
    stop: StopSignal,
    mut advance: impl FnMut(u8, &StopSignal) -> bool,
) -> RunReport {
    info!("Tuning: stepping through notes 0-{TUNE_LAST_NOTE}");
    let mut report = RunReport::default();

    for note in 0..=TUNE_LAST_NOTE {
        if stop.is_stopped() {
            report.stopped = true;
            break;
        }
        let allocation = session.handle_event(&NoteEvent::note_on(0, note, 127), Instant::now());
        report.record(allocation);
        info!("Note {note} ({})", note_name(note));

        let keep_going = advance(note, &stop);
        session.silence_all();
        if !keep_going {
            report.stopped = true;
            break;
        }
    }

    session.silence_all();
    report
}

/// Play from a live MIDI input until stopped or the port goes away.
#[cfg(feature = "midi-io")]
pub fn run_live(
    session: &Session,
    input: &haptic_midi::LiveInput,
    stop: StopSignal,
) -> Result<RunReport> {
    const POLL: Duration = Duration::from_millis(50);

    info!("Playing live from '{}'", input.name());
    let mut report = RunReport::default();
    let result = loop {
        if stop.is_stopped() {
            report.stopped = true;
            break Ok(());
        }
        match input.recv_timeout(POLL) {
            Ok(Some(event)) => {
                let allocation = session.handle_event(&event, Instant::now());
                report.record(allocation);
            }
            Ok(None) => {}
            Err(e) => break Err(crate::Error::from(e)),
        }
    };

    session.silence_all();
    result.map(|()| report)
}
