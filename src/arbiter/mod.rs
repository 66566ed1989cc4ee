//! Turn arbiter: half-duplex listen/speak state machine
//!
//! One shared audio path means capture and synthesis must never overlap.
//! The arbiter is the only component that starts or stops either engine or
//! touches the audio route. Everything else (engine callbacks, lookups,
//! delays, user commands) reaches it as an [`Event`] on one channel, so all
//! session state is mutated from a single loop.
//!
//! ```text
//!            Start                 Final(text)             reply ready
//!   Idle ───────────► Listening ─────────────► AwaitingResult ─────────► Speaking
//!    ▲                 ▲  │ capture error                                  │
//!    │                 │  ▼                                                │ Done(current id)
//!    │     backoff ┌── ErrorBackoff                                       │ + cool-down
//!    │             └──────┘                                                │
//!    │                 └───────────────────────────────────────────────────┘
//!    └── Stop / stop keyword / fatal capture error (from any state)
//! ```
//!
//! Deferred actions are spawned sleeps that post [`Event::Timer`] tagged
//! with the turn epoch. A timer acts only if, when it fires, its epoch is
//! still current, continuous mode is on, nothing is being synthesized and
//! the state is the one it was armed for.

mod event;
mod state;

use std::sync::Arc;
use std::time::Duration;

pub use event::{Command, Event, EventReceiver, EventSender, TimerKind, channel};
pub use state::{ArbiterState, Session};

use crate::audio::{AudioRouteManager, RouteKind};
use crate::config::CollectionMapping;
use crate::engine::{
    CaptureEngine, CaptureError, CaptureEvent, CaptureRequest, ErrorClass, SynthesisEngine,
    SynthesisEvent, UtteranceId,
};
use crate::normalize::PlateKey;
use crate::resolver::{Outcome, Phrasebook, QueryResolver};
use crate::status::{Status, StatusSink};
use crate::{Error, Result};

/// Timing and capture parameters
#[derive(Debug, Clone)]
pub struct ArbiterSettings {
    /// Parameters for every capture attempt
    pub capture: CaptureRequest,
    /// Transcripts containing any of these end the session
    pub stop_keywords: Vec<String>,
    /// Pause between a reply and the next capture
    pub cooldown: Duration,
    /// Cool-down on a wireless route, whose link needs longer to settle
    pub wireless_cooldown: Duration,
    /// Pause before retrying after a capture error
    pub retry_backoff: Duration,
    /// Pause before retrying after the recognizer reported it was busy
    pub busy_backoff: Duration,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            capture: CaptureRequest {
                locale: "zh-TW".to_string(),
                silence_ms: 1500,
            },
            stop_keywords: vec!["結束查詢".to_string(), "停止".to_string(), "結束".to_string()],
            cooldown: Duration::from_millis(600),
            wireless_cooldown: Duration::from_millis(1000),
            retry_backoff: Duration::from_millis(500),
            busy_backoff: Duration::from_millis(1500),
        }
    }
}

/// Collaborators the arbiter drives
pub struct Components {
    /// Speech-to-text engine
    pub capture: Box<dyn CaptureEngine>,
    /// Text-to-speech engine
    pub synthesis: Box<dyn SynthesisEngine>,
    /// Audio path control
    pub routes: AudioRouteManager,
    /// Lookup policy
    pub resolver: Arc<QueryResolver>,
    /// Status updates
    pub status: Arc<dyn StatusSink>,
}

/// The listen/speak state machine
pub struct TurnArbiter {
    state: ArbiterState,
    session: Session,
    capture: Box<dyn CaptureEngine>,
    synthesis: Box<dyn SynthesisEngine>,
    routes: AudioRouteManager,
    resolver: Arc<QueryResolver>,
    status: Arc<dyn StatusSink>,
    phrases: Phrasebook,
    communities: Vec<CollectionMapping>,
    settings: ArbiterSettings,
    events: EventSender,
    inbox: EventReceiver,
    epoch: u64,
    last_route: Option<RouteKind>,
    next_utterance: UtteranceId,
    speaking: Option<UtteranceId>,
    next_query: u64,
    in_flight: Option<u64>,
}

impl TurnArbiter {
    /// Create an arbiter on `community`
    ///
    /// `events` is the channel the engines were built with.
    ///
    /// # Errors
    ///
    /// Returns error if `community` is not one of `communities`
    pub fn new(
        components: Components,
        settings: ArbiterSettings,
        phrases: Phrasebook,
        communities: Vec<CollectionMapping>,
        community: &str,
        events: (EventSender, EventReceiver),
    ) -> Result<Self> {
        let mapping = find_community(&communities, community)
            .ok_or_else(|| Error::Config(format!("unknown community: {community}")))?;
        let session = Session::new(&mapping.label, &mapping.collection);
        let (events, inbox) = events;

        Ok(Self {
            state: ArbiterState::Idle,
            session,
            capture: components.capture,
            synthesis: components.synthesis,
            routes: components.routes,
            resolver: components.resolver,
            status: components.status,
            phrases,
            communities,
            settings,
            events,
            inbox,
            epoch: 0,
            last_route: None,
            next_utterance: 0,
            speaking: None,
            next_query: 0,
            in_flight: None,
        })
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ArbiterState {
        self.state
    }

    /// Current session data
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// The audio route manager
    #[must_use]
    pub const fn routes(&self) -> &AudioRouteManager {
        &self.routes
    }

    /// A sender for posting commands into this arbiter
    #[must_use]
    pub fn sender(&self) -> EventSender {
        self.events.clone()
    }

    /// Run until [`Command::Shutdown`], then release everything
    pub async fn run(mut self) {
        tracing::info!(community = %self.session.community, "turn arbiter running");
        while self.step().await {}
        self.teardown();
        tracing::info!("turn arbiter stopped");
    }

    /// Handle the next event; returns `false` once shut down
    pub async fn step(&mut self) -> bool {
        match self.inbox.recv().await {
            Some(Event::Command(Command::Shutdown)) | None => {
                self.halt();
                false
            }
            Some(event) => {
                self.handle(event);
                true
            }
        }
    }

    /// Apply one event
    pub fn handle(&mut self, event: Event) {
        tracing::trace!(state = %self.state, ?event, "event");
        match event {
            Event::Command(command) => self.on_command(command),
            Event::Capture(event) => self.on_capture(event),
            Event::Synthesis(event) => self.on_synthesis(event),
            Event::Resolved {
                query,
                key,
                outcome,
            } => self.on_resolved(query, &key, &outcome),
            Event::Timer { kind, epoch } => self.on_timer(kind, epoch),
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                if self.session.continuous {
                    tracing::debug!("already in continuous mode");
                    return;
                }
                tracing::info!(community = %self.session.community, "continuous mode on");
                self.session.continuous = true;
                self.last_route = None;
                self.start_listening();
            }
            Command::Stop => {
                tracing::info!("stop requested");
                self.halt();
            }
            Command::SelectCommunity(name) => self.switch_community(&name),
            Command::Shutdown => self.halt(),
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Ready => tracing::debug!("capture ready"),
            CaptureEvent::Partial(text) => tracing::trace!(text = %text, "partial transcript"),
            CaptureEvent::Final(text) => self.on_transcript(text),
            CaptureEvent::Error(error) => self.on_capture_error(error),
        }
    }

    fn on_transcript(&mut self, text: String) {
        if self.state != ArbiterState::Listening {
            tracing::debug!(state = %self.state, text = %text, "transcript outside listening, ignored");
            return;
        }

        tracing::info!(text = %text, "heard");
        self.set_state(ArbiterState::AwaitingResult);
        self.status.publish(Status::Heard(self.phrases.heard(&text)));
        self.session.last_utterance = Some(text.clone());

        if self.is_stop_keyword(&text) {
            tracing::info!(text = %text, "stop keyword");
            self.halt();
            self.say(self.phrases.farewell.clone());
            return;
        }

        if self.session.pending.len() >= 2 {
            if let Some((index, candidate)) =
                self.resolver.select_candidate(&text, &self.session.pending)
            {
                let reply = self.phrases.selected(index, candidate);
                tracing::info!(index, plate = %candidate.external_id, "candidate selected");
                self.session.pending.clear();
                self.respond(reply);
                return;
            }
            // an ordinal past the end of the list is not a plate query
            if let Some(index) = self.resolver.ordinal(&text) {
                tracing::debug!(index, pending = self.session.pending.len(), "ordinal out of range");
                self.session.pending.clear();
                self.respond(self.phrases.selection_unclear.clone());
                return;
            }
        }

        let key = self.resolver.normalize(&text);
        if key.is_empty() {
            if self.session.pending.is_empty() {
                tracing::debug!(text = %text, "nothing plate-like heard");
                self.back_off(self.settings.retry_backoff);
            } else {
                self.session.pending.clear();
                self.respond(self.phrases.selection_unclear.clone());
            }
            return;
        }

        self.session.pending.clear();
        self.submit(key);
    }

    fn on_capture_error(&mut self, error: CaptureError) {
        match self.state {
            ArbiterState::Listening => {}
            ArbiterState::AwaitingResult => {
                // the turn is abandoned; its lookup result will be dropped
                tracing::debug!(%error, query = ?self.in_flight, "capture error after transcript");
                self.in_flight = None;
            }
            state => {
                tracing::debug!(%state, %error, "capture error outside listening, ignored");
                return;
            }
        }

        if error.class() == ErrorClass::Fatal {
            tracing::error!(%error, "capture unusable, stopping");
            self.halt();
            self.status.publish(Status::Failed(error.to_string()));
            self.say(self.phrases.capture_fatal.clone());
            return;
        }

        let delay = if error.is_busy() {
            self.settings.busy_backoff
        } else {
            self.settings.retry_backoff
        };
        tracing::debug!(%error, ?delay, "capture error, retrying");
        self.status.publish(Status::Retrying { error, delay });
        self.back_off(delay);
    }

    fn on_synthesis(&mut self, event: SynthesisEvent) {
        let (id, failure) = match event {
            SynthesisEvent::Started(id) => {
                tracing::trace!(id, "synthesis started");
                return;
            }
            SynthesisEvent::Done(id) => (id, None),
            SynthesisEvent::Failed(id, reason) => (id, Some(reason)),
        };

        if self.speaking != Some(id) {
            tracing::debug!(id, current = ?self.speaking, "stale synthesis event, ignored");
            return;
        }
        self.speaking = None;
        self.session.synthesizing = false;

        if let Some(reason) = failure {
            tracing::warn!(id, reason = %reason, "synthesis failed");
            self.status.publish(Status::Failed(reason));
        }

        if self.state != ArbiterState::Speaking {
            return;
        }
        if self.session.continuous {
            self.schedule(TimerKind::Resume, self.cooldown());
        } else {
            self.set_state(ArbiterState::Idle);
        }
    }

    fn on_resolved(&mut self, query: u64, key: &PlateKey, outcome: &Outcome) {
        if self.in_flight != Some(query) {
            tracing::debug!(query, "stale lookup result, ignored");
            return;
        }
        self.in_flight = None;
        if self.state != ArbiterState::AwaitingResult {
            return;
        }

        tracing::info!(query, key = %key, outcome = outcome.label(), "lookup finished");
        if let Outcome::Failed(reason) = outcome {
            self.status.publish(Status::Failed(reason.clone()));
        }
        self.session.pending = outcome.pending().to_vec();
        self.respond(self.phrases.outcome(outcome, key));
    }

    fn on_timer(&mut self, kind: TimerKind, epoch: u64) {
        let expected = match kind {
            TimerKind::Resume => ArbiterState::Speaking,
            TimerKind::Retry => ArbiterState::ErrorBackoff,
        };
        if epoch != self.epoch
            || !self.session.continuous
            || self.session.synthesizing
            || self.state != expected
        {
            tracing::trace!(?kind, epoch, current = self.epoch, "timer no longer applies");
            return;
        }
        self.start_listening();
    }

    fn switch_community(&mut self, name: &str) {
        let Some(mapping) = find_community(&self.communities, name).cloned() else {
            tracing::warn!(community = name, "unknown community");
            self.status.publish(Status::Failed(format!("unknown community: {name}")));
            return;
        };

        tracing::info!(community = %mapping.label, collection = %mapping.collection, "community switched");
        self.session.community = mapping.label.clone();
        self.session.active_collection = mapping.collection;
        self.session.pending.clear();
        self.in_flight = None;
        self.status.publish(Status::Community(mapping.label.clone()));

        let announcement = self.phrases.switched(&mapping.label);
        if self.session.continuous {
            self.respond(announcement);
        } else {
            self.say(announcement);
        }
    }

    /// Lock the route and begin a capture attempt
    fn start_listening(&mut self) {
        if !self.session.continuous {
            self.set_state(ArbiterState::Idle);
            return;
        }
        if self.session.synthesizing {
            // the current utterance's Done resumes listening
            tracing::debug!("still speaking, not listening yet");
            self.set_state(ArbiterState::Speaking);
            return;
        }

        self.epoch += 1;

        match self.routes.lock_communication_route() {
            Ok(route) => {
                if self.last_route != Some(route.kind) {
                    self.last_route = Some(route.kind);
                    self.status.publish(Status::Route(self.phrases.route(route.kind)));
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not lock audio route, listening anyway"),
        }

        match self.capture.start(&self.settings.capture) {
            Ok(()) => self.set_state(ArbiterState::Listening),
            Err(e) => {
                tracing::warn!(error = %e, "capture failed to start");
                self.back_off(self.settings.retry_backoff);
            }
        }
    }

    /// Hand a key to the resolver without blocking the loop
    fn submit(&mut self, key: PlateKey) {
        self.next_query += 1;
        let query = self.next_query;
        self.in_flight = Some(query);

        let resolver = Arc::clone(&self.resolver);
        let collection = self.session.active_collection.clone();
        let events = self.events.clone();
        tracing::debug!(query, key = %key, collection = %collection, "lookup submitted");

        tokio::spawn(async move {
            let outcome = resolver.resolve(&key, &collection).await;
            if events
                .send(Event::Resolved {
                    query,
                    key,
                    outcome,
                })
                .await
                .is_err()
            {
                tracing::debug!(query, "arbiter gone, lookup result dropped");
            }
        });
    }

    /// Speak a reply and wait for it to finish before listening again
    fn respond(&mut self, text: String) {
        self.set_state(ArbiterState::Speaking);
        self.say(text);
    }

    /// Start synthesis; capture is always stopped first
    fn say(&mut self, text: String) {
        if self.capture.is_active() {
            self.capture.cancel();
        }
        if self.speaking.is_some() {
            self.synthesis.stop();
        }

        self.epoch += 1;
        self.next_utterance += 1;
        let id = self.next_utterance;
        self.status.publish(Status::Reply(text.clone()));

        match self.synthesis.speak(&text, id) {
            Ok(()) => {
                self.speaking = Some(id);
                self.session.synthesizing = true;
            }
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed to start");
                self.speaking = None;
                self.session.synthesizing = false;
                if self.state == ArbiterState::Speaking && self.session.continuous {
                    self.schedule(TimerKind::Resume, self.cooldown());
                } else if self.state == ArbiterState::Speaking {
                    self.set_state(ArbiterState::Idle);
                }
            }
        }
    }

    fn back_off(&mut self, delay: Duration) {
        if self.capture.is_active() {
            self.capture.cancel();
        }
        self.set_state(ArbiterState::ErrorBackoff);
        self.schedule(TimerKind::Retry, delay);
    }

    /// Leave continuous mode from any state
    fn halt(&mut self) {
        self.session.continuous = false;
        self.session.pending.clear();
        self.in_flight = None;
        self.epoch += 1;

        if self.capture.is_active() {
            self.capture.cancel();
        }
        if self.speaking.take().is_some() {
            self.synthesis.stop();
        }
        self.session.synthesizing = false;

        self.routes.release_route();
        self.set_state(ArbiterState::Idle);
    }

    fn teardown(&mut self) {
        self.capture.cancel();
        self.synthesis.stop();
        self.session.synthesizing = false;
        self.speaking = None;
        self.routes.release_route();
    }

    fn schedule(&self, kind: TimerKind, delay: Duration) {
        let events = self.events.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if events.send(Event::Timer { kind, epoch }).await.is_err() {
                tracing::trace!(?kind, "arbiter gone, timer dropped");
            }
        });
    }

    fn cooldown(&self) -> Duration {
        match self.last_route {
            Some(RouteKind::WirelessSco) => self.settings.wireless_cooldown,
            _ => self.settings.cooldown,
        }
    }

    fn is_stop_keyword(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.settings
            .stop_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && text.contains(&keyword.to_lowercase()))
    }

    fn set_state(&mut self, state: ArbiterState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "state change");
        self.state = state;
        self.status.publish(Status::State(state));
    }
}

fn find_community<'a>(
    communities: &'a [CollectionMapping],
    name: &str,
) -> Option<&'a CollectionMapping> {
    communities
        .iter()
        .find(|c| c.label == name || c.collection == name)
}
