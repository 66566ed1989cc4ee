//! Speech engines
//!
//! The arbiter drives a [`CaptureEngine`] and a [`SynthesisEngine`] through
//! plain synchronous calls. Engines do their work on their own tasks or
//! threads and report back by posting [`Event`]s into the arbiter channel;
//! they never call into the arbiter directly.
//!
//! Two implementations ship:
//! - [`console`]: stdin transcripts in, stdout speech out
//! - `cloud` (feature `host-audio`): microphone capture with energy
//!   endpointing and Whisper transcription, `OpenAI` speech played on the
//!   speaker

pub mod console;
pub mod endpoint;

#[cfg(feature = "host-audio")]
pub mod cloud;

use std::fmt;

use crate::Result;
use crate::arbiter::Event;

/// Identifier of one synthesized utterance
pub type UtteranceId = u64;

/// Parameters for one capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Recognition locale (BCP 47, e.g. `zh-TW`)
    pub locale: String,
    /// Trailing silence that ends an utterance
    pub silence_ms: u64,
}

/// Speech-to-text engine
pub trait CaptureEngine: Send {
    /// Begin one capture attempt; results arrive as [`CaptureEvent`]s
    ///
    /// # Errors
    ///
    /// Returns error if the attempt cannot be started at all
    fn start(&mut self, request: &CaptureRequest) -> Result<()>;

    /// Stop listening; audio heard so far may still produce a result
    fn stop(&mut self);

    /// Abort the attempt and drop any pending result
    fn cancel(&mut self);

    /// Whether an attempt is in progress
    fn is_active(&self) -> bool;
}

/// Text-to-speech engine
pub trait SynthesisEngine: Send {
    /// Speak `text`; progress arrives as [`SynthesisEvent`]s tagged with `id`
    ///
    /// # Errors
    ///
    /// Returns error if the utterance cannot be queued
    fn speak(&mut self, text: &str, id: UtteranceId) -> Result<()>;

    /// Interrupt the current utterance
    fn stop(&mut self);
}

/// Progress of a capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The engine is listening
    Ready,
    /// Interim transcript
    Partial(String),
    /// Finalized transcript
    Final(String),
    /// The attempt failed
    Error(CaptureError),
}

impl From<CaptureEvent> for Event {
    fn from(event: CaptureEvent) -> Self {
        Self::Capture(event)
    }
}

/// Progress of a synthesized utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// Audio output began
    Started(UtteranceId),
    /// Audio output finished
    Done(UtteranceId),
    /// The utterance could not be spoken
    Failed(UtteranceId, String),
}

impl From<SynthesisEvent> for Event {
    fn from(event: SynthesisEvent) -> Self {
        Self::Synthesis(event)
    }
}

/// How the arbiter reacts to a capture error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Back off and listen again
    Retryable,
    /// Stop continuous mode; needs an explicit restart
    Fatal,
}

/// Capture failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// Network operation timed out
    NetworkTimeout,
    /// Other network failure
    Network,
    /// Audio recording failed
    Audio,
    /// Recognition server failure
    Server,
    /// Client-side failure
    Client,
    /// No speech heard before the silence timeout
    SpeechTimeout,
    /// Speech heard but not recognized
    NoMatch,
    /// Recognizer still busy with a previous attempt
    RecognizerBusy,
    /// Microphone permission missing
    InsufficientPermissions,
    /// Recognition service rate limit
    TooManyRequests,
    /// Recognition server dropped the connection
    ServerDisconnected,
    /// Locale not supported
    LanguageNotSupported,
    /// Locale supported but its model is not installed
    LanguageUnavailable,
}

impl CaptureError {
    /// Retry policy for this error
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::InsufficientPermissions
            | Self::LanguageNotSupported
            | Self::LanguageUnavailable => ErrorClass::Fatal,
            _ => ErrorClass::Retryable,
        }
    }

    /// Whether the recognizer asked us to slow down
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::RecognizerBusy | Self::TooManyRequests)
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NetworkTimeout => "network timeout",
            Self::Network => "network error",
            Self::Audio => "audio recording error",
            Self::Server => "server error",
            Self::Client => "client error",
            Self::SpeechTimeout => "no speech heard",
            Self::NoMatch => "speech not recognized",
            Self::RecognizerBusy => "recognizer busy",
            Self::InsufficientPermissions => "microphone permission missing",
            Self::TooManyRequests => "too many requests",
            Self::ServerDisconnected => "server disconnected",
            Self::LanguageNotSupported => "language not supported",
            Self::LanguageUnavailable => "language unavailable",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(CaptureError::NoMatch.class(), ErrorClass::Retryable);
        assert_eq!(CaptureError::SpeechTimeout.class(), ErrorClass::Retryable);
        assert_eq!(CaptureError::Client.class(), ErrorClass::Retryable);
        assert_eq!(CaptureError::InsufficientPermissions.class(), ErrorClass::Fatal);
        assert_eq!(CaptureError::LanguageUnavailable.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_busy_errors() {
        assert!(CaptureError::RecognizerBusy.is_busy());
        assert!(CaptureError::TooManyRequests.is_busy());
        assert!(!CaptureError::Network.is_busy());
    }
}
