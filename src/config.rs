//! Configuration loading and management

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::wake::{PhraseSet, PollTiming, Strategy, WakeSettings};

const APP_DIR: &str = "companion-orchestrator";
const CONFIG_FILE: &str = "config.json";
const SETTINGS_FILE: &str = "settings.json";

pub const WS_URL_KEY: &str = "wsUrl";
pub const BASE_URL_KEY: &str = "baseUrl";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory for this platform")]
    NoConfigDir,

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend WebSocket endpoint
    pub ws_url: String,
    /// Backend HTTP base, used to resolve relative asset URLs
    pub base_url: String,
    /// Turn the mic back on once a conversation chain ends
    pub auto_start_mic_on_conv_end: bool,
    /// Phrases that end a conversation by turning the mic off
    pub end_phrases: Vec<String>,
    pub wake: WakeConfig,
    pub stt: SttConfig,
    pub agent: AgentConfig,

    /// Directory the config was read from
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:12393/client-ws".to_string(),
            base_url: "http://127.0.0.1:12393".to_string(),
            auto_start_mic_on_conv_end: false,
            end_phrases: ["结束对话", "关闭对话", "停止对话", "请结束对话"]
                .map(String::from)
                .to_vec(),
            wake: WakeConfig::default(),
            stt: SttConfig::default(),
            agent: AgentConfig::default(),
            data_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub enabled: bool,
    pub phrases: Vec<String>,
    pub strategy: Strategy,
    pub failure_threshold: u32,
    pub restart_delay_ms: u64,
    pub clip_duration_ms: u64,
    pub retry_delay_ms: u64,
    pub cycle_gap_ms: u64,
    /// Shell command that records one clip to stdout.
    /// `{seconds}` and `{millis}` are replaced with the clip length.
    pub capture_command: Option<String>,
    /// File extension of what `capture_command` produces
    pub capture_extension: Option<String>,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            phrases: vec!["你好，小薇".to_string()],
            strategy: Strategy::default(),
            failure_threshold: 5,
            restart_delay_ms: 5000,
            clip_duration_ms: 3000,
            retry_delay_ms: 1000,
            cycle_gap_ms: 500,
            capture_command: None,
            capture_extension: None,
        }
    }
}

impl WakeConfig {
    pub fn settings(&self) -> WakeSettings {
        WakeSettings {
            phrases: PhraseSet::new(&self.phrases),
            strategy: self.strategy,
            failure_threshold: self.failure_threshold,
            restart_delay: Duration::from_millis(self.restart_delay_ms),
        }
    }

    pub fn poll_timing(&self) -> PollTiming {
        PollTiming {
            clip: Duration::from_millis(self.clip_duration_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            cycle_gap: Duration::from_millis(self.cycle_gap_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Multipart transcription endpoint
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub language: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            language: "zh".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub allow_proactive_speak: bool,
    pub idle_seconds_to_speak: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            allow_proactive_speak: false,
            idle_seconds_to_speak: 5,
        }
    }
}

impl Config {
    /// Load configuration from the platform config directory, persisted
    /// settings and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join(APP_DIR);
        let mut config = Self::load_from(&data_dir)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read `config.json` from `data_dir` and apply `settings.json` on top.
    /// Missing files fall back to defaults.
    pub fn load_from(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config: Config = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "no config file, using defaults");
                Config::default()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        config.data_dir = data_dir.to_path_buf();

        let settings = SettingsStore::open(data_dir)?;
        if let Some(url) = settings.get(WS_URL_KEY) {
            config.ws_url = url.to_string();
        }
        if let Some(url) = settings.get(BASE_URL_KEY) {
            config.base_url = url.to_string();
        }
        Ok(config)
    }

    /// Environment variables win over files
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("COMPANION_WS_URL") {
            info!(url = %url, "ws url from environment");
            self.ws_url = url;
        }
        if let Some(url) = var("COMPANION_BASE_URL") {
            self.base_url = url;
        }
        if let Some(key) = var("COMPANION_STT_API_KEY") {
            self.stt.api_key = Some(key);
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_dir).map_err(|source| ConfigError::Io {
            path: self.data_dir.clone(),
            source,
        })
    }

    pub fn settings_store(&self) -> Result<SettingsStore, ConfigError> {
        SettingsStore::open(&self.data_dir)
    }
}

/// String key-value store persisted as `settings.json`
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl SettingsStore {
    pub fn open(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(SETTINGS_FILE);
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        Ok(Self { path, values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store a value and write the file. Unchanged values skip the write.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if self.get(key) == Some(value) {
            return Ok(());
        }
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }

    fn save(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&self.values).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = ?self.path, "settings saved");
        Ok(())
    }
}
