//! TOML configuration file loading
//!
//! Supports `~/.config/earpiece/config.toml` as a persistent config source.
//! All fields are optional: the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::resolver::Phrasebook;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct EarpieceConfigFile {
    /// Community selected at startup (label or collection id)
    pub default_community: Option<String>,

    /// Community label → collection mapping; replaces the built-in list
    #[serde(default)]
    pub communities: Vec<CommunityEntry>,

    /// Speech configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Turn-taking delays
    #[serde(default)]
    pub timing: TimingFileConfig,

    /// Plate store configuration
    #[serde(default)]
    pub store: StoreFileConfig,

    /// Reply templates
    #[serde(default)]
    pub phrases: Option<Phrasebook>,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// One `[[communities]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct CommunityEntry {
    /// Spoken/displayed name
    pub label: String,
    /// Store collection id
    pub collection: String,
}

/// Speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Recognition locale (e.g. "zh-TW")
    pub locale: Option<String>,

    /// Trailing silence that ends an utterance
    pub silence_ms: Option<u64>,

    /// How long one capture waits for speech to begin
    pub max_wait_ms: Option<u64>,

    /// Phrases that end the session
    pub stop_keywords: Option<Vec<String>>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// How long a console reply "speaks"
    pub console_speech_ms: Option<u64>,
}

/// Turn-taking delays
#[derive(Debug, Default, Deserialize)]
pub struct TimingFileConfig {
    pub cooldown_ms: Option<u64>,
    pub wireless_cooldown_ms: Option<u64>,
    pub retry_backoff_ms: Option<u64>,
    pub busy_backoff_ms: Option<u64>,
}

/// Plate store configuration
#[derive(Debug, Default, Deserialize)]
pub struct StoreFileConfig {
    /// Remote store base URL
    pub remote_url: Option<String>,

    /// Bearer token for the remote store
    pub token: Option<String>,

    /// Remote request timeout
    pub timeout_ms: Option<u64>,

    /// Interval of the reachability probe
    pub probe_interval_secs: Option<u64>,

    /// Offline cache database path
    pub cache_path: Option<String>,

    /// Shortest keyword derived for fuzzy lookup
    pub min_keyword_len: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `EarpieceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> EarpieceConfigFile {
    let Some(path) = config_file_path() else {
        return EarpieceConfigFile::default();
    };

    if !path.exists() {
        return EarpieceConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            EarpieceConfigFile::default()
        }
    }
}

/// Load a config file the user named explicitly
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_config_file(path: &Path) -> Result<EarpieceConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/earpiece/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("earpiece").join("config.toml"))
}
