//! Configuration for the ClAire client

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::directory::DEFAULT_CONTENT_CACHE;
use crate::voice::DEFAULT_VOICE;
use crate::{Error, Result};

pub use file::{ConfigFile, config_file_path, load_config_file};

/// Backend used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend base URL, without trailing slash
    pub api_url: String,

    /// Show answers while they stream in
    pub streaming: bool,

    /// Voice output configuration
    pub voice: VoiceConfig,

    /// Connect timeout for every backend request
    pub connect_timeout: Duration,

    /// Conversation texts kept in the directory's cache
    pub content_cache_entries: usize,
}

/// Voice output configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConfig {
    pub enabled: bool,
    pub voice_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            streaming: true,
            voice: VoiceConfig {
                enabled: true,
                voice_id: DEFAULT_VOICE.to_string(),
            },
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            content_cache_entries: DEFAULT_CONTENT_CACHE,
        }
    }
}

impl Config {
    /// Load configuration from the config file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if the config file is invalid or a value fails to parse
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = load_config_file(path)?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Layer environment values from `env` over `file` over defaults
    ///
    /// # Errors
    ///
    /// Returns error if a value fails to parse or the API URL is invalid
    pub fn resolve<F>(file: ConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = env("CLAIRE_API_URL")
            .or(file.api_url)
            .unwrap_or(defaults.api_url);

        let streaming = env_bool(&env, "CLAIRE_STREAMING")?
            .or(file.chat.streaming)
            .unwrap_or(defaults.streaming);

        let voice = VoiceConfig {
            enabled: env_bool(&env, "CLAIRE_VOICE")?
                .or(file.voice.enabled)
                .unwrap_or(defaults.voice.enabled),
            voice_id: env("CLAIRE_TTS_VOICE")
                .or(file.voice.voice_id)
                .unwrap_or(defaults.voice.voice_id),
        };

        let connect_timeout = match env("CLAIRE_CONNECT_TIMEOUT") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("CLAIRE_CONNECT_TIMEOUT: expected seconds, got {raw:?}"))
            })?),
            None => file.http.connect_timeout_secs,
        }
        .map_or(defaults.connect_timeout, Duration::from_secs);

        let content_cache_entries = file
            .cache
            .content_entries
            .unwrap_or(defaults.content_cache_entries);

        let config = Self {
            api_url: String::new(),
            streaming,
            voice,
            connect_timeout,
            content_cache_entries,
        };
        config.with_api_url(&api_url)
    }

    /// Replace the API URL, validating it
    ///
    /// # Errors
    ///
    /// Returns error if `api_url` is not an absolute http(s) URL
    pub fn with_api_url(mut self, api_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(api_url.trim())?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "api_url must be http or https, got {}",
                parsed.scheme()
            )));
        }

        self.api_url = api_url.trim().trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Turn voice output off regardless of other settings
    #[must_use]
    pub fn without_voice(mut self) -> Self {
        self.voice.enabled = false;
        self
    }
}

fn env_bool<F>(env: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = env(key) else {
        return Ok(None);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(Some(true)),
        "0" | "false" | "no" => Ok(Some(false)),
        _ => Err(Error::Config(format!("{key}: expected a boolean, got {raw:?}"))),
    }
}
