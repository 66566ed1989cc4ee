//! Events consumed by the arbiter loop

use tokio::sync::mpsc;

use crate::engine::{CaptureEvent, SynthesisEvent};
use crate::normalize::PlateKey;
use crate::resolver::Outcome;

/// Capacity of the arbiter event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Sending half of the arbiter channel, handed to engines and tasks
pub type EventSender = mpsc::Sender<Event>;

/// Receiving half of the arbiter channel
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create the arbiter event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Everything that can happen to a session, serialized on one channel
#[derive(Debug, Clone)]
pub enum Event {
    /// User or host command
    Command(Command),
    /// Capture engine progress
    Capture(CaptureEvent),
    /// Synthesis engine progress
    Synthesis(SynthesisEvent),
    /// A lookup finished
    Resolved {
        /// Query id assigned when the lookup was submitted
        query: u64,
        /// Key that was looked up
        key: PlateKey,
        /// Lookup result
        outcome: Outcome,
    },
    /// A deferred action is due
    Timer {
        /// What to do
        kind: TimerKind,
        /// Turn epoch when the timer was armed
        epoch: u64,
    },
}

impl From<Command> for Event {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

/// Commands from the user or host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Enter continuous listening
    Start,
    /// Leave continuous listening
    Stop,
    /// Switch the active community (label or collection id)
    SelectCommunity(String),
    /// Stop and end the arbiter loop
    Shutdown,
}

/// Deferred actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Listen again after speaking (cool-down)
    Resume,
    /// Listen again after a capture error (backoff)
    Retry,
}
