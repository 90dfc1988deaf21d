//! Decoding of synthesized speech payloads

use std::io::Cursor;

use crate::{Error, Result};

/// Sample rate of raw PCM returned by the speech endpoint
pub const PCM_SAMPLE_RATE: u32 = 48000;

/// Container format of a speech payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    /// Headerless 16-bit little-endian mono at [`PCM_SAMPLE_RATE`]
    Pcm16,
}

impl AudioFormat {
    /// Guess the format from the payload's leading bytes
    #[must_use]
    pub fn sniff(data: &[u8]) -> Self {
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            Self::Wav
        } else if data.starts_with(b"ID3") || is_mp3_frame_header(data) {
            Self::Mp3
        } else {
            Self::Pcm16
        }
    }
}

/// Whether the payload opens with a plausible MPEG audio frame header
fn is_mp3_frame_header(data: &[u8]) -> bool {
    let [sync, flags, rates, ..] = data else {
        return false;
    };
    let layer = (flags >> 1) & 0b11;
    let bitrate = rates >> 4;
    let sample_rate = (rates >> 2) & 0b11;

    *sync == 0xFF
        && flags & 0xE0 == 0xE0
        && layer != 0
        && bitrate != 0
        && bitrate != 0xF
        && sample_rate != 0b11
}

/// Mono f32 samples ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback length in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / u64::from(self.sample_rate)
    }
}

/// Decode a speech payload to mono samples
///
/// # Errors
///
/// Returns error if the payload is not valid for its detected format
pub fn decode_audio(data: &[u8]) -> Result<DecodedAudio> {
    let format = AudioFormat::sniff(data);
    tracing::debug!(?format, bytes = data.len(), "decoding speech audio");

    match format {
        AudioFormat::Wav => decode_wav(data),
        AudioFormat::Mp3 => {
            let audio = decode_mp3(data)?;
            // A PCM stream can open with bytes that look like a frame header
            if audio.samples.is_empty() && !data.starts_with(b"ID3") {
                return Ok(decode_pcm16(data));
            }
            Ok(audio)
        }
        AudioFormat::Pcm16 => Ok(decode_pcm16(data)),
    }
}

/// Decode raw 16-bit little-endian PCM; a dangling odd byte is ignored
fn decode_pcm16(data: &[u8]) -> DecodedAudio {
    let samples = data
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    DecodedAudio {
        samples,
        sample_rate: PCM_SAMPLE_RATE,
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, usize::from(spec.channels)),
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved frames down to one channel
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}
