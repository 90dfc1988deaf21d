//! Single-slot audio side effect
//!
//! Reading an answer aloud runs as a spawned task so it never blocks the
//! next question. The slot holds at most one such task: starting a new one
//! stops the current task and waits for its playback to be released first.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AudioState, ChatSnapshot, TurnId};
use crate::voice::Speaker;

/// Audio task currently owning the output
struct AudioTask {
    turn: TurnId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AudioTask {
    /// Cancel the task and wait until its playback is released
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            tracing::error!(turn = %self.turn, "audio task panicked");
        }
    }
}

pub(crate) struct AudioSlot {
    speaker: Speaker,
    current: Mutex<Option<AudioTask>>,
    snapshots: Arc<watch::Sender<ChatSnapshot>>,
}

impl AudioSlot {
    pub(crate) fn new(speaker: Speaker, snapshots: Arc<watch::Sender<ChatSnapshot>>) -> Self {
        Self {
            speaker,
            current: Mutex::new(None),
            snapshots,
        }
    }

    /// Synthesize and play `text`, replacing whatever is playing
    pub(crate) async fn play(&self, turn: TurnId, text: String) {
        let mut current = self.current.lock().await;

        if let Some(previous) = current.take() {
            tracing::debug!(previous = %previous.turn, next = %turn, "replacing audio");
            previous.stop().await;
        }

        set_audio(&self.snapshots, AudioState::Synthesizing(turn));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_audio(
            self.speaker.clone(),
            turn,
            text,
            cancel.clone(),
            Arc::clone(&self.snapshots),
        ));

        *current = Some(AudioTask {
            turn,
            cancel,
            handle,
        });
    }

    /// Stop current audio, waiting for the output to be released
    ///
    /// The slot stays locked until the output is released and the state is
    /// back to idle, so a concurrent [`play`](Self::play) starts after it.
    /// Returns `true` if a task was running or had not been reaped yet.
    pub(crate) async fn stop(&self) -> bool {
        let mut current = self.current.lock().await;

        match current.take() {
            Some(task) => {
                task.stop().await;
                set_audio(&self.snapshots, AudioState::Idle);
                true
            }
            None => false,
        }
    }

    /// Best-effort synchronous teardown
    pub(crate) fn abort(&self) {
        if let Ok(mut current) = self.current.try_lock()
            && let Some(task) = current.take()
        {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

fn set_audio(snapshots: &watch::Sender<ChatSnapshot>, audio: AudioState) {
    snapshots.send_modify(|snapshot| snapshot.audio = audio);
}

/// Synthesize, play, release. Failures are logged, never propagated.
async fn run_audio(
    speaker: Speaker,
    turn: TurnId,
    text: String,
    cancel: CancellationToken,
    snapshots: Arc<watch::Sender<ChatSnapshot>>,
) {
    let synthesized = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            set_audio(&snapshots, AudioState::Idle);
            return;
        }
        result = speaker.synthesizer.synthesize(&text) => result,
    };

    let audio = match synthesized {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(error = %e, turn = %turn, "speech synthesis failed");
            set_audio(&snapshots, AudioState::Idle);
            return;
        }
    };

    let mut playback = match speaker.output.start(audio).await {
        Ok(playback) => playback,
        Err(e) => {
            tracing::warn!(error = %e, turn = %turn, "audio playback failed to start");
            set_audio(&snapshots, AudioState::Idle);
            return;
        }
    };

    set_audio(&snapshots, AudioState::Playing(turn));

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            playback.stop();
            if let Err(e) = playback.finished().await {
                tracing::debug!(error = %e, turn = %turn, "playback error while stopping");
            }
        }
        result = playback.finished() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, turn = %turn, "audio playback failed");
            }
        }
    }

    drop(playback);
    set_audio(&snapshots, AudioState::Idle);
    tracing::debug!(turn = %turn, "audio released");
}
