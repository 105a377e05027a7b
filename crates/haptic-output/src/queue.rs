//! Bounded per-device command queue.
//!
//! One producer (the session) and one consumer (the device's scheduler
//! thread). Neither half is `Clone`. When the queue is full, a new command
//! replaces the newest pending command for the same motor. If there is none,
//! the queue is compacted to the newest command per motor (what the
//! scheduler would send anyway) and the command is appended. It is rejected
//! only when every pending command is for a different motor.

use haptic_voice::Command;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of pending commands per device.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// What happened to a pushed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; an older command for the same motor was overwritten
    Replaced,
    /// Queue was full of distinct motors, none of them this one
    Rejected,
    /// The consumer is gone
    Closed,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Command>,
    capacity: usize,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    ready: Condvar,
}

/// Create a linked producer/consumer pair.
pub fn command_queue(capacity: usize) -> (CommandProducer, CommandConsumer) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            pending: VecDeque::with_capacity(capacity),
            capacity,
            closed: false,
        }),
        ready: Condvar::new(),
    });
    (
        CommandProducer {
            shared: Arc::clone(&shared),
        },
        CommandConsumer { shared },
    )
}

/// Producer side, owned by the session.
#[derive(Debug)]
pub struct CommandProducer {
    shared: Arc<Shared>,
}

impl CommandProducer {
    pub fn push(&mut self, command: Command) -> PushOutcome {
        let mut state = self.shared.state.lock();
        if state.closed {
            return PushOutcome::Closed;
        }

        let stale = state
            .pending
            .iter()
            .rposition(|c| c.motor == command.motor);
        let outcome = if state.pending.len() < state.capacity {
            state.pending.push_back(command);
            PushOutcome::Queued
        } else if let Some(index) = stale {
            state.pending[index] = command;
            PushOutcome::Replaced
        } else {
            let dropped = compact(&mut state.pending);
            if state.pending.len() < state.capacity {
                debug!(dropped, "Output queue full, compacted to newest per motor");
                state.pending.push_back(command);
                PushOutcome::Queued
            } else {
                warn!(motor = %command.motor, "Output queue full, dropping command");
                PushOutcome::Rejected
            }
        };

        drop(state);
        self.shared.ready.notify_one();
        outcome
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

/// Keep only the newest pending command for each motor, preserving the
/// order of the survivors. Returns how many commands were dropped.
fn compact(pending: &mut VecDeque<Command>) -> usize {
    let before = pending.len();
    let mut kept: VecDeque<Command> = VecDeque::with_capacity(before);
    for command in pending.drain(..).rev() {
        if !kept.iter().any(|c| c.motor == command.motor) {
            kept.push_front(command);
        }
    }
    *pending = kept;
    before - pending.len()
}

impl Drop for CommandProducer {
    fn drop(&mut self) {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();
    }
}

/// Consumer side, owned by the scheduler thread.
#[derive(Debug)]
pub struct CommandConsumer {
    shared: Arc<Shared>,
}

impl CommandConsumer {
    /// Move every pending command into `out`, oldest first.
    pub fn drain_into(&mut self, out: &mut Vec<Command>) -> usize {
        let mut state = self.shared.state.lock();
        let count = state.pending.len();
        out.extend(state.pending.drain(..));
        count
    }

    /// Block until a command is pending, the producer is dropped, or
    /// `timeout` passes. Returns `true` if commands are pending.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if state.pending.is_empty() && !state.closed {
            let _ = self.shared.ready.wait_for(&mut state, timeout);
        }
        !state.pending.is_empty()
    }

    /// `true` once the producer is gone. Pending commands may remain.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

impl Drop for CommandConsumer {
    fn drop(&mut self) {
        self.shared.state.lock().closed = true;
    }
}
