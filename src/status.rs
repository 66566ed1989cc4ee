//! Status updates for an exterior UI or the log
//!
//! Publishing is fire-and-forget: a sink never blocks the arbiter and never
//! reports failure back to it.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::arbiter::ArbiterState;
use crate::engine::CaptureError;

/// One status update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The arbiter changed state
    State(ArbiterState),
    /// Input route line, already phrased for display
    Route(String),
    /// Final transcript echo, already phrased for display
    Heard(String),
    /// Reply text handed to synthesis
    Reply(String),
    /// Active community changed
    Community(String),
    /// A capture error will be retried
    Retrying {
        /// What went wrong
        error: CaptureError,
        /// Delay before the next attempt
        delay: Duration,
    },
    /// Something failed and needs attention
    Failed(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(state) => write!(f, "state: {state}"),
            Self::Route(line) | Self::Heard(line) => f.write_str(line),
            Self::Reply(text) => write!(f, "reply: {text}"),
            Self::Community(label) => write!(f, "community: {label}"),
            Self::Retrying { error, delay } => {
                write!(f, "retrying in {}ms: {error}", delay.as_millis())
            }
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Receives status updates
pub trait StatusSink: Send + Sync {
    /// Publish one update
    fn publish(&self, status: Status);
}

/// Writes every update to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn publish(&self, status: Status) {
        match &status {
            Status::Failed(_) => tracing::warn!(%status, "status"),
            Status::State(_) => tracing::debug!(%status, "status"),
            _ => tracing::info!(%status, "status"),
        }
    }
}

/// Forwards updates into a channel, dropping them when it is full
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::Sender<Status>,
}

impl ChannelStatusSink {
    /// Create a sink and the receiver it feeds
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Status>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelStatusSink {
    fn publish(&self, status: Status) {
        if let Err(e) = self.tx.try_send(status) {
            tracing::trace!(error = %e, "status update dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelStatusSink::new(1);
        sink.publish(Status::State(ArbiterState::Listening));
        sink.publish(Status::State(ArbiterState::Speaking));

        assert_eq!(rx.try_recv().unwrap(), Status::State(ArbiterState::Listening));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_display() {
        let status = Status::Retrying {
            error: CaptureError::RecognizerBusy,
            delay: Duration::from_millis(1500),
        };
        assert_eq!(status.to_string(), "retrying in 1500ms: recognizer busy");
        assert_eq!(Status::State(ArbiterState::ErrorBackoff).to_string(), "state: error_backoff");
    }
}
