//! Earpiece - hands-free plate lookup over a half-duplex headset
//!
//! A guard speaks a plate number (or a fragment of one) into a headset and
//! hears back which household it belongs to, without touching the phone:
//! - Turn arbitration between listening and speaking on one audio path
//! - Audio route selection and locking (built-in mic or wireless headset)
//! - Transcript normalization and exact/fuzzy plate resolution
//! - Remote plate store with an offline `SQLite` cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Engines / CLI                       │
//! │   Console  │  Whisper + TTS  │  Commands  │  Status │
//! └────────────────────┬────────────────────────────────┘
//!                      │ events
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Arbiter                         │
//! │   State machine  │  Timers  │  Audio Route Manager  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Query Resolver                        │
//! │   Normalizer  │  Remote store  │  Offline cache     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod arbiter;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod resolver;
pub mod status;
pub mod store;

pub use arbiter::{ArbiterSettings, ArbiterState, Command, Components, Event, TurnArbiter};
pub use audio::{AudioRoute, AudioRouteManager, RouteKind};
pub use config::{CollectionMapping, Config};
pub use error::{Error, Result};
pub use normalize::{Normalizer, PlateKey};
pub use resolver::{Candidate, Outcome, Phrasebook, QueryResolver};
pub use status::{Status, StatusSink};
pub use store::{PlateRecord, PlateStore, TieredStore};
