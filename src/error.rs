//! Error types for the ClAire client

use thiserror::Error;

/// Result type alias for ClAire client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the ClAire client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The answer endpoint refused the request before streaming began
    #[error("request failed with status {status}")]
    Transport {
        /// HTTP status code returned by the server
        status: u16,
    },

    /// The answer stream broke after it started
    #[error("stream error: {0}")]
    Stream(String),

    /// Speech synthesis failed
    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    /// Audio could not be decoded or played
    #[error("playback error: {0}")]
    Playback(String),

    /// Session manager call returned a non-success status
    #[error("failed to {action}: {status}")]
    Directory {
        /// What the client was trying to do (e.g. "fetch sessions")
        action: &'static str,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// HTTP status carried by this error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status } | Self::Directory { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
