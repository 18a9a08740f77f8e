//! Relay configuration loading from file and environment variables.

use crate::protocol::models::{AudioFormat, DEFAULT_MODEL, Temperature, TurnDetection, Voice};
use crate::relay::adapter::{DEFAULT_GREETING, DEFAULT_INSTRUCTIONS, SessionProfile};
use crate::relay::RelayOptions;
use crate::store::DbRuntimeSettings;
use crate::transport::rest::{self, SpeechModels};
use crate::transport::ws::{Endpoint, WS_BASE_URL};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    /// API credential. Only ever read from `OPENAI_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL the telephony provider reaches us on, e.g.
    /// `https://relay.example.com`. When unset, the request's `Host` header
    /// is used.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "rt_clinic_relay=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Realtime session settings applied to every call.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_realtime_url")]
    pub url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub voice: Voice,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub audio_format: AudioFormat,

    #[serde(default = "default_instructions")]
    pub instructions: String,

    #[serde(default = "default_greeting")]
    pub greeting: String,

    #[serde(default = "default_true")]
    pub respond_after_tool: bool,

    #[serde(default = "default_true")]
    pub barge_in: bool,
}

/// Batch speech endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,

    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    #[serde(default = "default_stt_model")]
    pub stt_model: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

const fn default_port() -> u16 {
    5050
}

fn default_db_path() -> String {
    "clinic.db".to_string()
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_realtime_url() -> String {
    WS_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

const fn default_temperature() -> f32 {
    0.6
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

const fn default_true() -> bool {
    true
}

fn default_speech_base_url() -> String {
    rest::BASE_URL.to_string()
}

fn default_tts_model() -> String {
    SpeechModels::default().tts
}

fn default_stt_model() -> String {
    SpeechModels::default().stt
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            model: default_model(),
            voice: Voice::default(),
            temperature: default_temperature(),
            connect_timeout_secs: default_connect_timeout_secs(),
            audio_format: AudioFormat::default(),
            instructions: default_instructions(),
            greeting: default_greeting(),
            respond_after_tool: true,
            barge_in: true,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: default_speech_base_url(),
            tts_model: default_tts_model(),
            stt_model: default_stt_model(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    #[must_use]
    pub const fn db_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.database.busy_timeout_ms,
            pool_max_size: self.database.pool_max_size,
        }
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.realtime.connect_timeout_secs)
    }

    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            url: self.realtime.url.clone(),
            model: Some(self.realtime.model.clone()),
            api_key: self.api_key.clone().unwrap_or_default(),
            connect_timeout: self.connect_timeout(),
        }
    }

    #[must_use]
    pub fn speech_models(&self) -> SpeechModels {
        SpeechModels {
            tts: self.speech.tts_model.clone(),
            stt: self.speech.stt_model.clone(),
        }
    }

    /// Per-call relay settings.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if the temperature is out of range.
    pub fn relay_options(&self) -> Result<RelayOptions, ConfigError> {
        let temperature = Temperature::new(self.realtime.temperature)
            .map_err(|e| ConfigError::Invalid(format!("realtime.temperature: {e}")))?;
        Ok(RelayOptions {
            profile: SessionProfile {
                instructions: self.realtime.instructions.clone(),
                greeting: self.realtime.greeting.clone(),
                voice: self.realtime.voice.clone(),
                temperature,
                audio_format: self.realtime.audio_format,
                turn_detection: TurnDetection::server_vad(),
            },
            connect_timeout: self.connect_timeout(),
            respond_after_tool: self.realtime.respond_after_tool,
            barge_in: self.realtime.barge_in,
        })
    }
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides.
///
/// Environment variable overrides:
/// - `RELAY_HOST` overrides `server.host`
/// - `RELAY_PORT` overrides `server.port`
/// - `RELAY_PUBLIC_URL` overrides `server.public_url`
/// - `RELAY_DB_PATH` overrides `database.path`
/// - `RELAY_LOG_LEVEL` overrides `logging.level`
/// - `RELAY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `RELAY_REALTIME_MODEL` overrides `realtime.model`
/// - `RELAY_VOICE` overrides `realtime.voice`
/// - `OPENAI_API_KEY` supplies the API credential
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Apply overrides from `lookup`, which maps a variable name to its value.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("RELAY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("RELAY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = lookup("RELAY_PUBLIC_URL") {
        config.server.public_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(db_path) = lookup("RELAY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = lookup("RELAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("RELAY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(model) = lookup("RELAY_REALTIME_MODEL") {
        config.realtime.model = model;
    }
    if let Some(voice) = lookup("RELAY_VOICE") {
        config.realtime.voice = Voice::from(voice);
    }
    if let Some(key) = lookup("OPENAI_API_KEY") {
        config.api_key = Some(key).filter(|k| !k.trim().is_empty());
    }
}
