//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use earpiece::arbiter::{self, Components, EventSender, TurnArbiter};
use earpiece::audio::{AudioRouteManager, InputDevice, StaticPlatform};
use earpiece::config::default_communities;
use earpiece::engine::{
    CaptureEngine, CaptureEvent, CaptureRequest, SynthesisEngine, SynthesisEvent, UtteranceId,
};
use earpiece::status::{Status, StatusSink};
use earpiece::store::{
    Connectivity, Fetched, LocalCache, PlateRecord, PlateStore, SourcePreference, TieredStore,
};
use earpiece::{ArbiterSettings, Normalizer, Phrasebook, QueryResolver, Result};

/// Shared view of both engines, used to assert they never overlap
#[derive(Debug, Default)]
pub struct Probe {
    capturing: AtomicBool,
    speaking: AtomicBool,
    overlapped: AtomicBool,
    last_utterance: AtomicU64,
    log: Mutex<Vec<String>>,
}

impl Probe {
    pub fn capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    pub fn speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Whether capture and synthesis were ever active together
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn last_utterance(&self) -> UtteranceId {
        self.last_utterance.load(Ordering::SeqCst)
    }

    /// Engine calls so far ("capture:start", "speak:...", ...)
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Texts handed to synthesis, oldest first
    pub fn spoken(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("speak:").map(ToString::to_string))
            .collect()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| *e == entry).count()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

/// Capture engine whose transcripts are posted by the test
pub struct FakeCapture {
    probe: Arc<Probe>,
    fail_start: bool,
}

impl FakeCapture {
    pub const fn new(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            fail_start: false,
        }
    }

    /// A capture engine that can never start
    pub const fn failing(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            fail_start: true,
        }
    }
}

impl CaptureEngine for FakeCapture {
    fn start(&mut self, _request: &CaptureRequest) -> Result<()> {
        if self.fail_start {
            return Err(earpiece::Error::Capture("no recognizer".to_string()));
        }
        if self.probe.speaking() {
            self.probe.overlapped.store(true, Ordering::SeqCst);
        }
        self.probe.capturing.store(true, Ordering::SeqCst);
        self.probe.record("capture:start".to_string());
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.capturing.store(false, Ordering::SeqCst);
        self.probe.record("capture:stop".to_string());
    }

    fn cancel(&mut self) {
        self.probe.capturing.store(false, Ordering::SeqCst);
        self.probe.record("capture:cancel".to_string());
    }

    fn is_active(&self) -> bool {
        self.probe.capturing()
    }
}

/// Synthesis engine that either finishes on its own or waits for the test
pub struct FakeSynth {
    probe: Arc<Probe>,
    events: EventSender,
    auto_done: Option<Duration>,
}

impl FakeSynth {
    pub const fn new(probe: Arc<Probe>, events: EventSender, auto_done: Option<Duration>) -> Self {
        Self {
            probe,
            events,
            auto_done,
        }
    }
}

impl SynthesisEngine for FakeSynth {
    fn speak(&mut self, text: &str, id: UtteranceId) -> Result<()> {
        if self.probe.capturing() {
            self.probe.overlapped.store(true, Ordering::SeqCst);
        }
        self.probe.speaking.store(true, Ordering::SeqCst);
        self.probe.last_utterance.store(id, Ordering::SeqCst);
        self.probe.record(format!("speak:{text}"));

        if let Some(delay) = self.auto_done {
            let probe = Arc::clone(&self.probe);
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if probe.last_utterance() == id {
                    probe.speaking.store(false, Ordering::SeqCst);
                }
                let _ = events.send(SynthesisEvent::Done(id).into()).await;
            });
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.speaking.store(false, Ordering::SeqCst);
        self.probe.record("synth:stop".to_string());
    }
}

/// Status sink that keeps everything it was given
#[derive(Debug, Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<Status>>,
}

impl RecordingSink {
    pub fn updates(&self) -> Vec<Status> {
        self.updates.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, status: Status) {
        self.updates.lock().unwrap().push(status);
    }
}

/// Offline plate store seeded with `records` in collection "lige"
pub fn offline_store(records: &[(&str, &str, &str)]) -> Arc<TieredStore> {
    let cache = LocalCache::in_memory().unwrap();
    let records: Vec<PlateRecord> = records
        .iter()
        .map(|(plate, household, note)| PlateRecord::new(plate, household, note, 2))
        .collect();
    cache.store_collection("lige", &records, "import").unwrap();
    cache.store_collection("fengshi", &[], "import").unwrap();
    Arc::new(TieredStore::new(None, cache, 2))
}

/// Resolver over an offline store
pub fn offline_resolver(records: &[(&str, &str, &str)]) -> Arc<QueryResolver> {
    let store = offline_store(records);
    let network = store.network();
    Arc::new(QueryResolver::new(Normalizer::default(), store, network))
}

/// Records shared by most arbiter scenarios
pub const PLATES: [(&str, &str, &str); 3] = [
    ("ABC1234", "A棟 3樓之1", ""),
    ("AA8888", "B棟 5樓", "訪客車位"),
    ("BB8888", "C棟 2樓", ""),
];

/// Everything an arbiter test needs to drive and inspect a session
pub struct Harness {
    pub arbiter: TurnArbiter,
    pub probe: Arc<Probe>,
    pub platform: Arc<StaticPlatform>,
    pub status: Arc<RecordingSink>,
    pub events: EventSender,
}

impl Harness {
    /// Offline session on "大陸麗格" over a built-in microphone
    pub fn new(auto_done: Option<Duration>) -> Self {
        Self::with_devices(auto_done, &[], ArbiterSettings::default())
    }

    pub fn with_devices(auto_done: Option<Duration>, devices: &[&str], settings: ArbiterSettings) -> Self {
        let probe = Arc::new(Probe::default());
        let (events, inbox) = arbiter::channel();
        let platform = Arc::new(StaticPlatform::new(
            devices.iter().map(|name| InputDevice::from_name(name)).collect(),
            true,
        ));
        let status = Arc::new(RecordingSink::default());

        let components = Components {
            capture: Box::new(FakeCapture::new(Arc::clone(&probe))),
            synthesis: Box::new(FakeSynth::new(Arc::clone(&probe), events.clone(), auto_done)),
            routes: AudioRouteManager::new(platform.clone()),
            resolver: offline_resolver(&PLATES),
            status: status.clone(),
        };

        let arbiter = TurnArbiter::new(
            components,
            settings,
            Phrasebook::default(),
            default_communities(),
            "大陸麗格",
            (events.clone(), inbox),
        )
        .unwrap();

        Self {
            arbiter,
            probe,
            platform,
            status,
            events,
        }
    }

    /// Post an event and let the arbiter handle it
    pub async fn post(&mut self, event: impl Into<earpiece::Event>) {
        self.events.send(event.into()).await.unwrap();
        assert!(self.arbiter.step().await);
    }

    /// The capture engine delivers a final transcript
    pub async fn hear(&mut self, text: &str) {
        self.probe.capturing.store(false, Ordering::SeqCst);
        self.post(CaptureEvent::Final(text.to_string())).await;
    }

    /// Synthesis of the latest utterance finishes
    pub async fn finish_speaking(&mut self) {
        let id = self.probe.last_utterance();
        self.probe.speaking.store(false, Ordering::SeqCst);
        self.post(SynthesisEvent::Done(id)).await;
    }

    /// Handle whatever the arbiter receives next (lookup result, timer, ...)
    pub async fn step(&mut self) {
        assert!(self.arbiter.step().await);
    }
}

/// In-memory store with a scripted remote side, counting forced remote reads
#[derive(Default)]
pub struct ScriptedStore {
    local: HashMap<String, PlateRecord>,
    remote: HashMap<String, PlateRecord>,
    online: AtomicBool,
    forced_reads: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(local: &[(&str, &str)], remote: &[(&str, &str)], online: bool) -> Self {
        let table = |records: &[(&str, &str)]| {
            records
                .iter()
                .map(|(plate, household)| {
                    ((*plate).to_string(), PlateRecord::new(plate, household, "", 2))
                })
                .collect()
        };
        Self {
            local: table(local),
            remote: table(remote),
            online: AtomicBool::new(online),
            forced_reads: AtomicUsize::new(0),
        }
    }

    pub fn forced_reads(&self) -> usize {
        self.forced_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlateStore for ScriptedStore {
    async fn get(
        &self,
        _collection: &str,
        key: &str,
        preference: SourcePreference,
    ) -> Result<Fetched<Option<PlateRecord>>> {
        match preference {
            SourcePreference::PreferLocal => Ok(Fetched::local(self.local.get(key).cloned())),
            SourcePreference::ForceRemote => {
                self.forced_reads.fetch_add(1, Ordering::SeqCst);
                if !self.online.load(Ordering::SeqCst) {
                    return Err(earpiece::Error::StoreUnavailable("offline".to_string()));
                }
                Ok(Fetched::remote(self.remote.get(key).cloned()))
            }
        }
    }

    async fn query(
        &self,
        _collection: &str,
        _field: &str,
        value: &str,
        _preference: SourcePreference,
    ) -> Result<Fetched<Vec<PlateRecord>>> {
        let mut found: Vec<PlateRecord> = self
            .local
            .values()
            .filter(|record| record.keywords.iter().any(|k| k == value))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.plate.cmp(&b.plate));
        Ok(Fetched::local(found))
    }
}

impl Connectivity for ScriptedStore {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
