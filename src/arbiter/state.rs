//! Arbiter state and session data

use std::fmt;

use crate::resolver::Candidate;

/// Turn-taking state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArbiterState {
    /// Not listening; continuous mode off or halted
    #[default]
    Idle,
    /// Capture running
    Listening,
    /// Utterance finalized, reply being prepared
    AwaitingResult,
    /// Reply being spoken, or cooling down before listening again
    Speaking,
    /// Waiting to retry after a capture error
    ErrorBackoff,
}

impl fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::AwaitingResult => write!(f, "awaiting_result"),
            Self::Speaking => write!(f, "speaking"),
            Self::ErrorBackoff => write!(f, "error_backoff"),
        }
    }
}

/// Mutable session data, owned by the arbiter
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Community label currently selected
    pub community: String,
    /// Store collection of the selected community
    pub active_collection: String,
    /// Keep listening after each reply
    pub continuous: bool,
    /// An utterance is being synthesized
    pub synthesizing: bool,
    /// Candidates awaiting an ordinal reply
    pub pending: Vec<Candidate>,
    /// Last finalized transcript
    pub last_utterance: Option<String>,
}

impl Session {
    /// Start a session on a community
    #[must_use]
    pub fn new(community: &str, collection: &str) -> Self {
        Self {
            community: community.to_string(),
            active_collection: collection.to_string(),
            ..Self::default()
        }
    }
}
