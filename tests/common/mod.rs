//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use claire_client::voice::{AudioOutput, Playback, SpeechSynthesizer};
use claire_client::{
    AnswerSource, AnswerStream, AudioState, ChatSnapshot, Error, Result, TurnController,
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Upper bound for any wait in a test
pub const WAIT: Duration = Duration::from_secs(5);

/// HTTP client pointed at nothing in particular
#[must_use]
pub fn http_client() -> reqwest::Client {
    claire_client::build_http_client(Duration::from_secs(5)).expect("failed to build http client")
}

/// Answer stream that yields `chunks` and ends
#[must_use]
pub fn chunks(chunks: &[&[u8]]) -> AnswerStream {
    let items: Vec<Result<Bytes>> = chunks
        .iter()
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    AnswerStream::from_bytes(stream::iter(items))
}

/// Answer stream that yields `chunks` and then breaks
#[must_use]
pub fn chunks_then_error(chunks: &[&[u8]], message: &str) -> AnswerStream {
    let mut items: Vec<Result<Bytes>> = chunks
        .iter()
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    items.push(Err(Error::Stream(message.to_string())));
    AnswerStream::from_bytes(stream::iter(items))
}

/// Answer stream fed by the returned sender; ends when the sender is dropped
#[must_use]
pub fn live() -> (mpsc::UnboundedSender<Result<Bytes>>, AnswerStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, AnswerStream::from_bytes(UnboundedReceiverStream::new(rx)))
}

/// Live answer stream that also reports when its source is dropped
#[must_use]
pub fn tracked_live() -> (mpsc::UnboundedSender<Result<Bytes>>, AnswerStream, Arc<AtomicBool>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dropped = Arc::new(AtomicBool::new(false));
    let source = DropFlag {
        inner: UnboundedReceiverStream::new(rx),
        dropped: Arc::clone(&dropped),
    };
    (tx, AnswerStream::from_bytes(source), dropped)
}

struct DropFlag<S> {
    inner: S,
    dropped: Arc<AtomicBool>,
}

impl<S: Stream + Unpin> Stream for DropFlag<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<S> Drop for DropFlag<S> {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Answer source that replays prepared replies in order
pub struct ScriptedAnswers {
    replies: Mutex<VecDeque<Result<AnswerStream>>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedAnswers {
    #[must_use]
    pub fn new(replies: Vec<Result<AnswerStream>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// `(query, session_id)` pairs received so far
    #[must_use]
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerSource for ScriptedAnswers {
    async fn ask(&self, query: &str, session_id: &str) -> Result<AnswerStream> {
        self.requests
            .lock()
            .unwrap()
            .push((query.to_string(), session_id.to_string()));

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(Error::Transport { status: 503 }))
    }
}

/// Synthesizer that echoes the text back as the audio payload
#[derive(Default)]
pub struct RecordingSynth {
    texts: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingSynth {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            texts: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(Error::Synthesis("TTS error 500: voice unavailable".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Output that counts concurrently held playbacks
///
/// Playbacks either finish immediately or are held until stopped or
/// [`RecordingOutput::release_all`] is called.
pub struct RecordingOutput {
    played: Mutex<Vec<Vec<u8>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    release: watch::Sender<bool>,
    /// Time a stopped playback keeps the device before finishing
    stop_latency: Duration,
}

impl RecordingOutput {
    fn with_release(released: bool, stop_latency: Duration) -> Arc<Self> {
        let (release, _) = watch::channel(released);
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
            release,
            stop_latency,
        })
    }

    /// Playbacks finish as soon as they start
    #[must_use]
    pub fn instant() -> Arc<Self> {
        Self::with_release(true, Duration::ZERO)
    }

    /// Playbacks run until stopped or released
    #[must_use]
    pub fn held() -> Arc<Self> {
        Self::with_release(false, Duration::ZERO)
    }

    /// Like [`held`](Self::held), but a stop takes `latency` to finish,
    /// the way a device thread notices its stop flag on the next poll
    #[must_use]
    pub fn held_slow_stop(latency: Duration) -> Arc<Self> {
        Self::with_release(false, latency)
    }

    pub fn release_all(&self) {
        self.release.send_replace(true);
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Payloads played so far, as text
    #[must_use]
    pub fn played(&self) -> Vec<String> {
        self.played
            .lock()
            .unwrap()
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect()
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn start(&self, audio: Vec<u8>) -> Result<Box<dyn Playback>> {
        self.played.lock().unwrap().push(audio);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let (stop, _) = watch::channel(false);
        Ok(Box::new(FakePlayback {
            stop,
            release: self.release.subscribe(),
            active: Arc::clone(&self.active),
            stops: Arc::clone(&self.stops),
            stop_latency: self.stop_latency,
        }))
    }
}

struct FakePlayback {
    stop: watch::Sender<bool>,
    release: watch::Receiver<bool>,
    active: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    stop_latency: Duration,
}

#[async_trait]
impl Playback for FakePlayback {
    async fn finished(&mut self) -> Result<()> {
        let mut stopped = self.stop.subscribe();
        let was_stopped = tokio::select! {
            _ = stopped.wait_for(|s| *s) => true,
            _ = self.release.wait_for(|r| *r) => false,
        };
        if was_stopped && !self.stop_latency.is_zero() {
            tokio::time::sleep(self.stop_latency).await;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stop.send_replace(true);
    }
}

impl Drop for FakePlayback {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait until a snapshot satisfies `f`
pub async fn wait_until<F>(controller: &TurnController, f: F) -> ChatSnapshot
where
    F: FnMut(&ChatSnapshot) -> bool,
{
    let mut rx = controller.subscribe();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(f))
        .await
        .expect("timed out waiting for snapshot")
        .expect("controller dropped")
        .clone();
    snapshot
}

/// Wait until no audio is being synthesized or played
pub async fn audio_idle(controller: &TurnController) {
    wait_until(controller, |s| s.audio == AudioState::Idle).await;
}
