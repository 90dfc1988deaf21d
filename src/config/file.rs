//! TOML configuration file loading
//!
//! The file lives at `<config dir>/claire/config.toml` unless a path is
//! given explicitly. Every field is optional; the file is a partial overlay
//! on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Backend base URL (e.g. "http://localhost:8000")
    pub api_url: Option<String>,

    #[serde(default)]
    pub chat: ChatFileConfig,

    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub http: HttpFileConfig,

    #[serde(default)]
    pub cache: CacheFileConfig,
}

/// Chat behavior
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatFileConfig {
    /// Show answers while they stream in
    pub streaming: Option<bool>,
}

/// Voice output
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceFileConfig {
    /// Read answers aloud
    pub enabled: Option<bool>,

    /// TTS voice identifier
    pub voice_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpFileConfig {
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheFileConfig {
    /// Conversation texts kept in memory
    pub content_entries: Option<usize>,
}

/// Load a config file
///
/// A missing file at the default location yields defaults; a missing file
/// at an explicit path is an error, as is any file that fails to parse.
///
/// # Errors
///
/// Returns error if an explicit path cannot be read or the file is invalid
pub fn load_config_file(path: Option<&Path>) -> Result<ConfigFile> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match config_file_path() {
            Some(path) => (path, false),
            None => return Ok(ConfigFile::default()),
        },
    };

    if !explicit && !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the default config file path: `<config dir>/claire/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "claire").map(|d| d.config_dir().join("config.toml"))
}
