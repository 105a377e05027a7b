//! Real-time playback of a parsed file.
//!
//! [`Playback`] yields each event at its wall-clock offset from the start.
//! A [`StopHandle`] ends playback early from any thread.

use crate::event::TimedNoteEvent;
use crate::file::ParsedMidiFile;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Create a linked stop handle and signal.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let stopped = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded(1);
    (
        StopHandle {
            stopped: Arc::clone(&stopped),
            wake: tx,
        },
        StopSignal { stopped, wake: rx },
    )
}

/// Requests a stop. Cheap to clone into signal handlers.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // A full channel already holds a pending wake-up
        let _ = self.wake.try_send(());
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Observes a stop request; can sleep until one arrives.
#[derive(Debug, Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`. Returns `true` if a stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        match self.wake.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => self.is_stopped(),
            Err(RecvTimeoutError::Disconnected) => {
                // Every handle is gone, so nobody can stop us any more
                std::thread::sleep(timeout);
                self.is_stopped()
            }
        }
    }
}

/// Iterator over a file's events, paced in real time.
pub struct Playback<'a> {
    events: std::slice::Iter<'a, TimedNoteEvent>,
    start: Instant,
    signal: StopSignal,
    stopped: bool,
}

impl<'a> Playback<'a> {
    pub fn new(events: &'a [TimedNoteEvent], signal: StopSignal) -> Self {
        Self {
            events: events.iter(),
            start: Instant::now(),
            signal,
            stopped: false,
        }
    }

    /// `true` if playback ended because of a stop request.
    pub fn was_stopped(&self) -> bool {
        self.stopped
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Iterator for Playback<'_> {
    type Item = TimedNoteEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }
        let event = *self.events.next()?;

        let due = self.start + event.at;
        let remaining = due.saturating_duration_since(Instant::now());
        let interrupted = if remaining.is_zero() {
            self.signal.is_stopped()
        } else {
            self.signal.wait(remaining)
        };

        if interrupted {
            self.stopped = true;
            return None;
        }
        Some(event)
    }
}

impl ParsedMidiFile {
    /// Start real-time playback from now.
    pub fn play(&self, signal: StopSignal) -> Playback<'_> {
        Playback::new(&self.events, signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NoteEvent;

    fn events(offsets_ms: &[u64]) -> Vec<TimedNoteEvent> {
        offsets_ms
            .iter()
            .map(|&ms| TimedNoteEvent {
                at: Duration::from_millis(ms),
                event: NoteEvent::note_on(0, 60, 100),
            })
            .collect()
    }

    #[test]
    fn test_events_arrive_no_earlier_than_scheduled() {
        let events = events(&[0, 20, 40]);
        let (_handle, signal) = stop_channel();
        let mut playback = Playback::new(&events, signal);

        let mut count = 0;
        while let Some(event) = playback.next() {
            assert!(playback.elapsed() >= event.at);
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(!playback.was_stopped());
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let events = events(&[0, 10_000]);
        let (handle, signal) = stop_channel();
        let mut playback = Playback::new(&events, signal);

        assert!(playback.next().is_some());

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.stop();
        });

        let started = Instant::now();
        assert!(playback.next().is_none());
        assert!(playback.was_stopped());
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn test_wait_without_handles_times_out() {
        let (handle, signal) = stop_channel();
        drop(handle);
        assert!(!signal.wait(Duration::from_millis(5)));
    }

    #[test]
    fn test_stop_is_sticky() {
        let (handle, signal) = stop_channel();
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        assert!(signal.wait(Duration::from_secs(1)));
        assert!(signal.wait(Duration::from_secs(1)));
    }
}
