use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use earpiece::arbiter::{self, Components, EventSender, TurnArbiter};
use earpiece::audio::{AudioPlatform, AudioRouteManager, StaticPlatform};
use earpiece::engine::console::{ConsoleCapture, ConsoleSynthesis};
use earpiece::engine::{CaptureEngine, SynthesisEngine};
use earpiece::status::LogStatusSink;
use earpiece::store::{LocalCache, PlateRecord, RemoteStore, TieredStore};
use earpiece::{CollectionMapping, Config, Normalizer, QueryResolver};

/// Earpiece - hands-free plate lookup over a headset
#[derive(Parser)]
#[command(name = "earpiece", version, about)]
struct Cli {
    /// Config file (default: ~/.config/earpiece/config.toml)
    #[arg(short, long, env = "EARPIECE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a continuous listening session
    Run {
        /// Community to start on (label or collection id)
        #[arg(long)]
        community: Option<String>,

        /// Speech engines to drive
        #[arg(long, value_enum, default_value_t = EngineKind::Console)]
        engine: EngineKind,
    },
    /// Resolve one utterance and print the reply
    Lookup {
        /// What the guard would have said
        utterance: String,

        /// Community to search
        #[arg(long)]
        community: Option<String>,
    },
    /// Load plate records from a JSON file into the offline cache
    Import {
        /// JSON array of `{"plate", "household", "note"}` objects
        file: PathBuf,

        /// Community the records belong to
        #[arg(long)]
        community: Option<String>,
    },
    /// Download collections from the remote store into the offline cache
    Sync {
        /// Only this community (default: all)
        #[arg(long)]
        community: Option<String>,
    },
    /// List input devices and the route that would be selected
    Devices,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// Typed transcripts on stdin, replies printed on stdout
    Console,
    /// Microphone + Whisper, `OpenAI` TTS on the speaker
    Cloud,
}

type Engines = (
    Box<dyn CaptureEngine>,
    Box<dyn SynthesisEngine>,
    Arc<dyn AudioPlatform>,
);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; stdout belongs to the console engine
    let filter = match cli.verbose {
        0 => "warn,earpiece=info",
        1 => "info,earpiece=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!(
        community = %config.default_community,
        remote = ?config.store.remote_url,
        cache = %config.store.cache_path.display(),
        "loaded configuration"
    );

    match cli.command {
        Command::Run { community, engine } => cmd_run(&config, community.as_deref(), engine).await,
        Command::Lookup {
            utterance,
            community,
        } => cmd_lookup(&config, &utterance, community.as_deref()).await,
        Command::Import { file, community } => cmd_import(&config, &file, community.as_deref()),
        Command::Sync { community } => cmd_sync(&config, community.as_deref()).await,
        Command::Devices => cmd_devices(),
    }
}

/// Run the turn arbiter until interrupted or the input closes
async fn cmd_run(config: &Config, community: Option<&str>, engine: EngineKind) -> anyhow::Result<()> {
    let mapping = pick_community(config, community)?;
    let store = Arc::new(open_store(config)?);
    let _probe = store.watch_network(config.store.probe_interval);
    let resolver = Arc::new(build_resolver(&store));

    let (events, inbox) = arbiter::channel();
    let (capture, synthesis, platform) = match engine {
        EngineKind::Console => console_engines(config, &events),
        EngineKind::Cloud => cloud_engines(config, &events)?,
    };

    let components = Components {
        capture,
        synthesis,
        routes: AudioRouteManager::new(platform),
        resolver,
        status: Arc::new(LogStatusSink),
    };
    let arbiter = TurnArbiter::new(
        components,
        config.arbiter_settings(),
        config.phrases.clone(),
        config.communities.clone(),
        &mapping.label,
        (events, inbox),
    )?;

    let sender = arbiter.sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            let _ = sender.send(arbiter::Command::Shutdown.into()).await;
        }
    });

    arbiter
        .sender()
        .send(arbiter::Command::Start.into())
        .await
        .map_err(|_| anyhow!("arbiter stopped before it started"))?;

    if engine == EngineKind::Console {
        println!(
            "{} - type what you would say; :community <name>, :stop, :start, :quit",
            mapping.label
        );
    }
    arbiter.run().await;
    Ok(())
}

fn console_engines(config: &Config, events: &EventSender) -> Engines {
    (
        Box::new(ConsoleCapture::stdin(events.clone())),
        Box::new(ConsoleSynthesis::stdout(
            events.clone(),
            Duration::from_millis(config.voice.console_speech_ms),
        )),
        Arc::new(StaticPlatform::default()),
    )
}

#[cfg(feature = "host-audio")]
fn cloud_engines(config: &Config, events: &EventSender) -> anyhow::Result<Engines> {
    use earpiece::audio::host::HostPlatform;
    use earpiece::engine::cloud::{CloudCapture, CloudSynthesis, SpeechToText, TextToSpeech};

    let key = config
        .openai_api_key
        .clone()
        .ok_or_else(|| anyhow!("OPENAI_API_KEY is required for the cloud engine"))?;

    let platform = HostPlatform::new();
    let stt = SpeechToText::new(key.clone(), config.voice.stt_model.clone())?;
    let tts = TextToSpeech::new(
        key,
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )?;

    let capture = CloudCapture::new(
        stt,
        events.clone(),
        platform.pinned(),
        Duration::from_millis(config.voice.max_wait_ms),
    );
    let synthesis = CloudSynthesis::new(tts, events.clone());
    let engines: Engines = (Box::new(capture), Box::new(synthesis), Arc::new(platform));
    Ok(engines)
}

#[cfg(not(feature = "host-audio"))]
fn cloud_engines(_config: &Config, _events: &EventSender) -> anyhow::Result<Engines> {
    anyhow::bail!("the cloud engine needs host audio; rebuild with --features host-audio")
}

/// Resolve a single utterance without the arbiter
async fn cmd_lookup(config: &Config, utterance: &str, community: Option<&str>) -> anyhow::Result<()> {
    let mapping = pick_community(config, community)?;
    let store = Arc::new(open_store(config)?);
    let resolver = build_resolver(&store);

    let key = resolver.normalize(utterance);
    if key.is_empty() {
        anyhow::bail!("no plate characters in {utterance:?}");
    }

    let outcome = resolver.resolve(&key, &mapping.collection).await;
    tracing::debug!(key = %key, outcome = outcome.label(), "lookup finished");
    println!("{}", config.phrases.outcome(&outcome, &key));
    for (i, candidate) in outcome.pending().iter().enumerate() {
        println!(
            "  {}. {} {} ({:?})",
            i + 1,
            candidate.external_id,
            candidate.household_label,
            candidate.origin
        );
    }
    Ok(())
}

/// Import a JSON file of records into a cached collection
fn cmd_import(config: &Config, file: &Path, community: Option<&str>) -> anyhow::Result<()> {
    let mapping = pick_community(config, community)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let mut records: Vec<PlateRecord> =
        serde_json::from_str(&content).with_context(|| format!("invalid records in {}", file.display()))?;

    let normalizer = Normalizer::default();
    for record in &mut records {
        record.plate = normalizer.normalize(&record.plate).as_str().to_string();
        record.ensure_keywords(config.store.min_keyword_len);
    }
    let before = records.len();
    records.retain(|record| !record.plate.is_empty());
    if records.len() < before {
        tracing::warn!(skipped = before - records.len(), "records without a usable plate skipped");
    }

    let cache = LocalCache::open(&config.store.cache_path)?;
    let stored = cache.store_collection(&mapping.collection, &records, "import")?;
    println!("{}: imported {stored} records", mapping.label);
    Ok(())
}

/// Refresh cached collections from the remote store
async fn cmd_sync(config: &Config, community: Option<&str>) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let targets: Vec<&CollectionMapping> = match community {
        Some(name) => vec![pick_community(config, Some(name))?],
        None => config.communities.iter().collect(),
    };

    for mapping in targets {
        let count = store
            .sync_collection(&mapping.collection)
            .await
            .with_context(|| format!("sync of {} failed", mapping.label))?;
        println!("{}: {count} records", mapping.label);
    }
    Ok(())
}

#[cfg(feature = "host-audio")]
fn cmd_devices() -> anyhow::Result<()> {
    use earpiece::audio::host::HostPlatform;

    let platform = Arc::new(HostPlatform::new());
    for device in platform.input_devices()? {
        println!("{:<8} {}", format!("{:?}", device.kind), device.name);
    }

    let routes = AudioRouteManager::new(platform);
    let route = routes.select_input_route();
    println!(
        "selected: {} ({})",
        route.kind,
        route.device.as_ref().map_or("default input", |d| d.name.as_str())
    );
    Ok(())
}

#[cfg(not(feature = "host-audio"))]
fn cmd_devices() -> anyhow::Result<()> {
    anyhow::bail!("device listing needs host audio; rebuild with --features host-audio")
}

fn pick_community<'a>(config: &'a Config, name: Option<&str>) -> anyhow::Result<&'a CollectionMapping> {
    let name = name.unwrap_or(&config.default_community);
    config
        .community(name)
        .ok_or_else(|| anyhow!("unknown community: {name}"))
}

fn open_store(config: &Config) -> anyhow::Result<TieredStore> {
    let remote = config
        .store
        .remote_url
        .as_deref()
        .map(|url| RemoteStore::new(url, config.store.token.clone(), config.store.timeout))
        .transpose()?;
    let cache = LocalCache::open(&config.store.cache_path)?;
    Ok(TieredStore::new(remote, cache, config.store.min_keyword_len))
}

fn build_resolver(store: &Arc<TieredStore>) -> QueryResolver {
    QueryResolver::new(Normalizer::default(), store.clone(), store.network())
}
