//! Text-to-speech (TTS) client

use async_trait::async_trait;

use crate::{Error, Result};

/// Path of the speech generation endpoint
pub const GENERATE_PATH: &str = "/api/text_to_speech/generate";

/// Voice used when none is configured
pub const DEFAULT_VOICE: &str = "YTpq7expH9539ERJ";

/// Something that can turn text into an audio payload
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize text to speech
    ///
    /// # Returns
    ///
    /// Encoded audio bytes (WAV, MP3 or raw PCM)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synthesis`] if the service fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Synthesizes speech through the ClAire backend
#[derive(Debug, Clone)]
pub struct SpeechClient {
    client: reqwest::Client,
    base_url: String,
    voice: String,
}

impl SpeechClient {
    /// Create a new speech client using [`DEFAULT_VOICE`]
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `base_url` - Backend origin (e.g., `http://localhost:8000`)
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self::with_voice(client, base_url, DEFAULT_VOICE)
    }

    /// Create a new speech client with a specific voice
    #[must_use]
    pub fn with_voice(client: reqwest::Client, base_url: &str, voice: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            voice: voice.to_string(),
        }
    }

    /// Voice identifier sent with each request
    #[must_use]
    pub fn voice(&self) -> &str {
        &self.voice
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}{GENERATE_PATH}", self.base_url);

        let response = self
            .client
            .post(&url)
            .query(&[("text", text), ("voice", self.voice.as_str())])
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        tracing::debug!(bytes = audio.len(), voice = %self.voice, "speech synthesized");
        Ok(audio.to_vec())
    }
}
