//! Voice output
//!
//! Speech synthesis goes through the backend's TTS endpoint; the returned
//! payload is decoded and played on the local output device.

mod decode;
mod playback;
mod tts;

use std::sync::Arc;

pub use decode::{AudioFormat, DecodedAudio, PCM_SAMPLE_RATE, decode_audio};
pub use playback::{AudioOutput, DeviceOutput, Playback};
pub use tts::{DEFAULT_VOICE, GENERATE_PATH, SpeechClient, SpeechSynthesizer};

/// Synthesizer and output device used to read answers aloud
#[derive(Clone)]
pub struct Speaker {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub output: Arc<dyn AudioOutput>,
}

impl Speaker {
    /// Pair a synthesizer with an output
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            synthesizer,
            output,
        }
    }
}

impl std::fmt::Debug for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Speaker").finish_non_exhaustive()
    }
}
