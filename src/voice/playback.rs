//! Audio playback to speakers
//!
//! Each playback owns one output stream on a dedicated thread. The stream is
//! dropped when the audio runs out, when [`Playback::stop`] is called, or when
//! the handle itself is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::oneshot;

use super::decode::{DecodedAudio, decode_audio};
use crate::{Error, Result};

/// How often the playback thread checks for completion or a stop request
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Grace period past the expected duration before giving up on the device
const DRAIN_SLACK: Duration = Duration::from_millis(500);

/// Something that can play a synthesized speech payload
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Start playing `audio`, returning the handle that owns the output
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if the payload cannot be decoded or no
    /// output device can be opened
    async fn start(&self, audio: Vec<u8>) -> Result<Box<dyn Playback>>;
}

/// A running playback
///
/// Dropping the handle releases the output resource.
#[async_trait]
pub trait Playback: Send {
    /// Wait until the audio has played out (or failed) and the output has
    /// been released
    ///
    /// Cancel-safe: awaiting again after an interrupted call keeps waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if the device reported an error
    async fn finished(&mut self) -> Result<()>;

    /// Ask the playback to stop as soon as possible
    fn stop(&mut self);
}

/// Plays audio on the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceOutput;

impl DeviceOutput {
    /// Create a new device output
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioOutput for DeviceOutput {
    async fn start(&self, audio: Vec<u8>) -> Result<Box<dyn Playback>> {
        let decoded = decode_audio(&audio)?;
        let playback = start_on_thread(decoded, play_blocking).await?;
        Ok(Box::new(playback))
    }
}

/// Run `player` on a dedicated thread and wait until it has opened the device
///
/// The handle exists before the wait, so dropping this future part way
/// still tells the thread to stop.
async fn start_on_thread<P>(decoded: DecodedAudio, player: P) -> Result<DevicePlayback>
where
    P: FnOnce(&DecodedAudio, &AtomicBool, oneshot::Sender<Result<()>>) -> Result<()>
        + Send
        + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    let thread_stop = Arc::clone(&stop);
    std::thread::Builder::new()
        .name("claire-playback".to_string())
        .spawn(move || {
            let result = player(&decoded, &thread_stop, ready_tx);
            let _ = done_tx.send(result);
        })?;

    let playback = DevicePlayback {
        stop,
        done: Some(done_rx),
    };

    match ready_rx.await {
        Ok(Ok(())) => Ok(playback),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Playback(
            "playback thread exited before opening the device".to_string(),
        )),
    }
}

/// Handle to a playback running on the device thread
struct DevicePlayback {
    stop: Arc<AtomicBool>,
    done: Option<oneshot::Receiver<Result<()>>>,
}

#[async_trait]
impl Playback for DevicePlayback {
    async fn finished(&mut self) -> Result<()> {
        let Some(done) = self.done.as_mut() else {
            return Ok(());
        };

        let result = done
            .await
            .unwrap_or_else(|_| Err(Error::Playback("playback thread panicked".to_string())));
        self.done = None;
        result
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for DevicePlayback {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Open the output stream for `audio`
fn open_stream(
    audio: &DecodedAudio,
    samples: Arc<Vec<f32>>,
    position: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

    let rate = SampleRate(audio.sample_rate);
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
        })
        .ok_or_else(|| {
            Error::Playback(format!(
                "no output config supports {} Hz",
                audio.sample_rate
            ))
        })?;

    let config: StreamConfig = supported_config.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = audio.sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position.load(Ordering::Acquire);

                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if pos < samples.len() {
                        pos += 1;
                    }
                }

                position.store(pos, Ordering::Release);
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;
    Ok(stream)
}

/// Play until the samples run out, a stop is requested, or the device fails
fn play_blocking(
    audio: &DecodedAudio,
    stop: &AtomicBool,
    ready: oneshot::Sender<Result<()>>,
) -> Result<()> {
    if audio.samples.is_empty() {
        let _ = ready.send(Ok(()));
        return Ok(());
    }

    let samples = Arc::new(audio.samples.clone());
    let position = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicBool::new(false));

    let stream = match open_stream(
        audio,
        Arc::clone(&samples),
        Arc::clone(&position),
        Arc::clone(&failed),
    ) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };

    let timeout = Duration::from_millis(audio.duration_ms()) + DRAIN_SLACK;
    let start = Instant::now();

    let outcome = loop {
        if stop.load(Ordering::Acquire) {
            tracing::debug!("playback stopped");
            break Ok(());
        }
        if failed.load(Ordering::Acquire) {
            break Err(Error::Playback("output device reported an error".to_string()));
        }
        if position.load(Ordering::Acquire) >= samples.len() {
            // Let the last buffer reach the speakers
            std::thread::sleep(POLL_INTERVAL * 5);
            break Ok(());
        }
        if start.elapsed() > timeout {
            tracing::warn!("playback did not drain in time");
            break Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    drop(stream);
    tracing::debug!(samples = samples.len(), "playback released");

    outcome
}
