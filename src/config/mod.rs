//! Configuration management
//!
//! Priority for every setting: environment variable > TOML file > default.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use file::{EarpieceConfigFile, config_file_path, load_config_file, read_config_file};

use crate::arbiter::ArbiterSettings;
use crate::engine::CaptureRequest;
use crate::resolver::Phrasebook;
use crate::{Error, Result};

/// Community label → store collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMapping {
    /// Name spoken and shown to the user
    pub label: String,
    /// Store collection id
    pub collection: String,
}

impl CollectionMapping {
    /// Create a mapping
    #[must_use]
    pub fn new(label: &str, collection: &str) -> Self {
        Self {
            label: label.to_string(),
            collection: collection.to_string(),
        }
    }
}

/// Communities served when the config file lists none
#[must_use]
pub fn default_communities() -> Vec<CollectionMapping> {
    vec![
        CollectionMapping::new("大陸麗格", "lige"),
        CollectionMapping::new("大陸豐蒔", "fengshi"),
        CollectionMapping::new("大陸寶格", "baoge"),
    ]
}

/// Earpiece configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Selectable communities
    pub communities: Vec<CollectionMapping>,

    /// Community active at startup
    pub default_community: String,

    /// Speech configuration
    pub voice: VoiceConfig,

    /// Turn-taking delays
    pub timing: TimingConfig,

    /// Plate store configuration
    pub store: StoreConfig,

    /// Reply templates
    pub phrases: Phrasebook,

    /// Data directory (offline cache lives here by default)
    pub data_dir: PathBuf,

    /// `OpenAI` API key for cloud speech
    pub openai_api_key: Option<String>,
}

/// Speech configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub locale: String,
    pub silence_ms: u64,
    pub max_wait_ms: u64,
    pub stop_keywords: Vec<String>,
    pub stt_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,
    pub console_speech_ms: u64,
}

/// Turn-taking delays in milliseconds
#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub cooldown_ms: u64,
    pub wireless_cooldown_ms: u64,
    pub retry_backoff_ms: u64,
    pub busy_backoff_ms: u64,
}

/// Plate store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Remote store base URL; offline-only when unset
    pub remote_url: Option<String>,
    /// Bearer token for the remote store
    pub token: Option<String>,
    /// Remote request timeout
    pub timeout: Duration,
    /// Reachability probe interval
    pub probe_interval: Duration,
    /// Offline cache database
    pub cache_path: PathBuf,
    /// Shortest fuzzy-lookup keyword
    pub min_keyword_len: usize,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(load_config_file(), |key| std::env::var(key).ok())
    }

    /// Load configuration using an explicit config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the configuration is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_sources(read_config_file(path)?, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn from_sources<F>(fc: EarpieceConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let communities = if fc.communities.is_empty() {
            default_communities()
        } else {
            fc.communities
                .iter()
                .map(|c| CollectionMapping::new(c.label.trim(), c.collection.trim()))
                .collect()
        };

        let default_community = env("EARPIECE_COMMUNITY")
            .or(fc.default_community)
            .or_else(|| communities.first().map(|c| c.label.clone()))
            .ok_or_else(|| Error::Config("no communities configured".to_string()))?;

        let voice = VoiceConfig {
            locale: env("EARPIECE_LOCALE")
                .or(fc.voice.locale)
                .unwrap_or_else(|| "zh-TW".to_string()),
            silence_ms: fc.voice.silence_ms.unwrap_or(1500),
            max_wait_ms: fc.voice.max_wait_ms.unwrap_or(8000),
            stop_keywords: fc.voice.stop_keywords.unwrap_or_else(|| {
                vec!["結束查詢".to_string(), "停止".to_string(), "結束".to_string()]
            }),
            stt_model: env("EARPIECE_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: env("EARPIECE_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: fc.voice.tts_voice.unwrap_or_else(|| "alloy".to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0),
            console_speech_ms: fc.voice.console_speech_ms.unwrap_or(300),
        };

        let timing = TimingConfig {
            cooldown_ms: fc.timing.cooldown_ms.unwrap_or(600),
            wireless_cooldown_ms: fc.timing.wireless_cooldown_ms.unwrap_or(1000),
            retry_backoff_ms: fc.timing.retry_backoff_ms.unwrap_or(500),
            busy_backoff_ms: fc.timing.busy_backoff_ms.unwrap_or(1500),
        };

        // Data directory (~/.local/share/earpiece on Linux)
        let data_dir = env("EARPIECE_DATA_DIR").map_or_else(
            || {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("earpiece"))
            },
            PathBuf::from,
        );

        let store = StoreConfig {
            remote_url: env("EARPIECE_STORE_URL")
                .or(fc.store.remote_url)
                .filter(|url| !url.trim().is_empty()),
            token: env("EARPIECE_STORE_TOKEN").or(fc.store.token),
            timeout: Duration::from_millis(fc.store.timeout_ms.unwrap_or(3000)),
            probe_interval: Duration::from_secs(fc.store.probe_interval_secs.unwrap_or(30)),
            cache_path: fc
                .store
                .cache_path
                .map_or_else(|| data_dir.join("plates.db"), PathBuf::from),
            min_keyword_len: fc.store.min_keyword_len.unwrap_or(2),
        };

        let config = Self {
            communities,
            default_community,
            voice,
            timing,
            store,
            phrases: fc.phrases.unwrap_or_default(),
            data_dir,
            openai_api_key: env("OPENAI_API_KEY").or(fc.api_keys.openai),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(bad) = self
            .communities
            .iter()
            .find(|c| c.label.is_empty() || c.collection.is_empty())
        {
            return Err(Error::Config(format!(
                "community entries need a label and a collection: {bad:?}"
            )));
        }
        if self.community(&self.default_community).is_none() {
            return Err(Error::Config(format!(
                "default community {} is not configured",
                self.default_community
            )));
        }
        if self.store.min_keyword_len == 0 {
            return Err(Error::Config("store.min_keyword_len must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Find a community by label or collection id
    #[must_use]
    pub fn community(&self, name: &str) -> Option<&CollectionMapping> {
        self.communities
            .iter()
            .find(|c| c.label == name || c.collection == name)
    }

    /// Timing and capture parameters for the arbiter
    #[must_use]
    pub fn arbiter_settings(&self) -> ArbiterSettings {
        ArbiterSettings {
            capture: CaptureRequest {
                locale: self.voice.locale.clone(),
                silence_ms: self.voice.silence_ms,
            },
            stop_keywords: self.voice.stop_keywords.clone(),
            cooldown: Duration::from_millis(self.timing.cooldown_ms),
            wireless_cooldown: Duration::from_millis(self.timing.wireless_cooldown_ms),
            retry_backoff: Duration::from_millis(self.timing.retry_backoff_ms),
            busy_backoff: Duration::from_millis(self.timing.busy_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(toml: &str, env: &[(&str, &str)]) -> Result<Config> {
        let fc: EarpieceConfigFile = toml::from_str(toml).unwrap();
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(fc, |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load("", &[]).unwrap();
        assert_eq!(config.communities, default_communities());
        assert_eq!(config.default_community, "大陸麗格");
        assert_eq!(config.voice.locale, "zh-TW");
        assert!(config.store.remote_url.is_none());
        assert_eq!(config.store.min_keyword_len, 2);

        let settings = config.arbiter_settings();
        assert_eq!(settings.cooldown, Duration::from_millis(600));
        assert_eq!(settings.wireless_cooldown, Duration::from_millis(1000));
        assert_eq!(settings.retry_backoff, Duration::from_millis(500));
        assert_eq!(settings.busy_backoff, Duration::from_millis(1500));
    }

    #[test]
    fn test_env_overrides_file() {
        let config = load(
            r#"
            default_community = "大陸麗格"
            [store]
            remote_url = "https://file.example.com"
            "#,
            &[
                ("EARPIECE_COMMUNITY", "baoge"),
                ("EARPIECE_STORE_URL", "https://env.example.com"),
                ("EARPIECE_DATA_DIR", "/tmp/earpiece-test"),
            ],
        )
        .unwrap();

        assert_eq!(config.default_community, "baoge");
        assert_eq!(config.community("baoge").unwrap().label, "大陸寶格");
        assert_eq!(config.store.remote_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.store.cache_path, PathBuf::from("/tmp/earpiece-test/plates.db"));
    }

    #[test]
    fn test_blank_remote_url_means_offline() {
        let config = load("", &[("EARPIECE_STORE_URL", "  ")]).unwrap();
        assert!(config.store.remote_url.is_none());
    }

    #[test]
    fn test_unknown_default_community_rejected() {
        assert!(load("", &[("EARPIECE_COMMUNITY", "大陸寶格二期")]).is_err());
    }

    #[test]
    fn test_custom_communities_replace_defaults() {
        let config = load(
            r#"
            [[communities]]
            label = "測試社區"
            collection = "test"
            "#,
            &[],
        )
        .unwrap();
        assert_eq!(config.communities.len(), 1);
        assert_eq!(config.default_community, "測試社區");
    }

    #[test]
    fn test_zero_keyword_len_rejected() {
        assert!(load("[store]\nmin_keyword_len = 0", &[]).is_err());
    }
}
