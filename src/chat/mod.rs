//! Conversational turn controller
//!
//! Drives one question/answer exchange at a time for the selected session:
//! appends the user turn and an open assistant turn, feeds streamed
//! fragments into the assistant turn, and once the answer is complete hands
//! its text to the audio slot to be read aloud.
//!
//! Observers never touch the turn sequence directly. They read
//! [`ChatSnapshot`]s published on a `watch` channel after every change.
//!
//! ```text
//!  Idle ──submit──▶ Sending ──open──▶ Streaming ──end──▶ Completed ──▶ Idle
//!                       │                 │                  │
//!                       └────error────────┴──▶ Failed ──▶ Idle
//!                                                            ▼
//!                                   audio slot: Synthesizing ──▶ PlayingAudio ──▶ Idle
//! ```

mod audio;
mod turn;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::transport::AnswerSource;
use crate::voice::Speaker;

use audio::AudioSlot;
pub use turn::{Role, Turn, TurnId, TurnSequence};

/// Where the controller is in an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ExchangeState {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
    Synthesizing,
    PlayingAudio,
}

/// What the audio slot is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioState {
    #[default]
    Idle,
    Synthesizing(TurnId),
    Playing(TurnId),
}

impl AudioState {
    /// Turn whose answer is being voiced
    #[must_use]
    pub const fn turn(self) -> Option<TurnId> {
        match self {
            Self::Idle => None,
            Self::Synthesizing(id) | Self::Playing(id) => Some(id),
        }
    }
}

/// Read-only view of the controller for the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub session_id: Option<String>,
    pub turns: Vec<Turn>,
    /// Text exchange phase; audio is tracked separately
    pub phase: ExchangeState,
    pub audio: AudioState,
}

impl ChatSnapshot {
    /// Combined state: the text phase while an exchange runs, otherwise the
    /// audio state
    #[must_use]
    pub const fn state(&self) -> ExchangeState {
        match (self.phase, self.audio) {
            (ExchangeState::Idle, AudioState::Synthesizing(_)) => ExchangeState::Synthesizing,
            (ExchangeState::Idle, AudioState::Playing(_)) => ExchangeState::PlayingAudio,
            (phase, _) => phase,
        }
    }

    /// Whether a new query would be accepted right now
    #[must_use]
    pub const fn accepts_queries(&self) -> bool {
        self.session_id.is_some() && matches!(self.phase, ExchangeState::Idle)
    }
}

/// Result of [`TurnController::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// No session selected, or the query was blank; nothing changed
    Ignored,
    /// Another exchange is still running; nothing changed
    Rejected,
    /// The answer streamed to completion
    Answered(TurnId),
    /// The answer failed; the turn holds the error description
    Failed { turn: TurnId, error: String },
    /// The exchange was cancelled or the session changed mid-stream
    Cancelled(TurnId),
}

/// What [`TurnController::interrupt`] stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// A streaming answer was cancelled
    Exchange,
    /// Audio was being synthesized or played
    Audio,
    /// Nothing was running
    Nothing,
}

/// State guarded by the controller's lock
struct ChatState {
    session_id: Option<String>,
    /// Bumped on every session change; stale exchanges compare against it
    epoch: u64,
    turns: TurnSequence,
    phase: ExchangeState,
    cancel: CancellationToken,
}

/// Owns the turn sequence and audio for the selected session
///
/// Share it as `Arc<TurnController>`: every method takes `&self`, so a
/// session change or cancel can arrive while [`submit`](Self::submit) is
/// still streaming. The internal lock is never held across an await.
pub struct TurnController {
    answers: Arc<dyn AnswerSource>,
    streaming: bool,
    audio: Option<AudioSlot>,
    state: Mutex<ChatState>,
    snapshots: Arc<watch::Sender<ChatSnapshot>>,
}

impl TurnController {
    /// Create a controller with streaming on and audio off
    #[must_use]
    pub fn new(answers: Arc<dyn AnswerSource>) -> Self {
        let (snapshots, _) = watch::channel(ChatSnapshot::default());

        Self {
            answers,
            streaming: true,
            audio: None,
            state: Mutex::new(ChatState {
                session_id: None,
                epoch: 0,
                turns: TurnSequence::new(),
                phase: ExchangeState::Idle,
                cancel: CancellationToken::new(),
            }),
            snapshots: Arc::new(snapshots),
        }
    }

    /// Read completed answers aloud with `speaker`
    #[must_use]
    pub fn with_speaker(mut self, speaker: Speaker) -> Self {
        self.audio = Some(AudioSlot::new(speaker, Arc::clone(&self.snapshots)));
        self
    }

    /// Publish partial answers while they stream (default), or only once
    /// complete
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &ChatState) {
        self.snapshots.send_modify(|snapshot| {
            snapshot.session_id.clone_from(&state.session_id);
            snapshot.turns = state.turns.as_slice().to_vec();
            snapshot.phase = state.phase;
        });
    }

    /// Apply `change` if the exchange from `epoch` is still current
    fn update<F>(&self, epoch: u64, publish: bool, change: F) -> bool
    where
        F: FnOnce(&mut ChatState) -> bool,
    {
        let mut state = self.lock();
        if state.epoch != epoch {
            return false;
        }

        let changed = change(&mut state);
        if changed && publish {
            self.publish(&state);
        }
        changed
    }

    /// Subscribe to snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.subscribe()
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Currently selected session
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    /// Select a session, or none
    ///
    /// Switching to a different session cancels any in-flight answer, stops
    /// audio, and clears the turn sequence. Re-selecting the current session
    /// changes nothing.
    pub async fn select_session(&self, session_id: Option<&str>) {
        {
            let mut state = self.lock();
            if state.session_id.as_deref() == session_id {
                return;
            }

            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            state.epoch += 1;
            state.session_id = session_id.map(str::to_string);
            state.turns.clear();
            state.phase = ExchangeState::Idle;
            self.publish(&state);
        }

        tracing::info!(session_id = session_id.unwrap_or("<none>"), "session selected");

        if let Some(audio) = &self.audio {
            audio.stop().await;
        }
    }

    /// Ask a question in the selected session
    ///
    /// Resolves once the text answer is complete, failed or cancelled. Reading
    /// the answer aloud continues in the background.
    pub async fn submit(&self, query: &str) -> SubmitOutcome {
        let (session_id, epoch, cancel, turn) = {
            let mut state = self.lock();

            let Some(session_id) = state.session_id.clone() else {
                tracing::debug!("no session selected, ignoring query");
                return SubmitOutcome::Ignored;
            };
            if query.trim().is_empty() {
                return SubmitOutcome::Ignored;
            }
            if state.phase != ExchangeState::Idle || state.turns.open_turn().is_some() {
                tracing::debug!(phase = ?state.phase, "exchange in progress, rejecting query");
                return SubmitOutcome::Rejected;
            }

            state.turns.push_user(query);
            let Some(turn) = state.turns.open_assistant() else {
                return SubmitOutcome::Rejected;
            };
            state.phase = ExchangeState::Sending;
            self.publish(&state);

            (session_id, state.epoch, state.cancel.clone(), turn)
        };

        let mut guard = ExchangeGuard {
            controller: self,
            epoch,
            turn,
            armed: true,
        };
        tracing::info!(session_id = %session_id, turn = %turn, "query submitted");

        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(turn = %turn, "exchange cancelled");
                return SubmitOutcome::Cancelled(turn);
            }
            received = self.receive_answer(&session_id, query, epoch, turn) => received,
        };

        let outcome = match received {
            Ok(fragments) => self.complete(epoch, turn, fragments).await,
            Err(e) => self.fail(epoch, turn, &e.to_string()),
        };
        guard.armed = false;
        outcome
    }

    /// Open the answer stream and apply fragments in arrival order
    async fn receive_answer(
        &self,
        session_id: &str,
        query: &str,
        epoch: u64,
        turn: TurnId,
    ) -> Result<usize> {
        let mut stream = self.answers.ask(query, session_id).await?;

        self.update(epoch, true, |state| {
            state.phase = ExchangeState::Streaming;
            true
        });

        let mut fragments = 0;
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            fragments += 1;

            if !self.update(epoch, self.streaming, |state| state.turns.append(turn, &fragment)) {
                tracing::debug!(turn = %turn, "exchange went stale, dropping stream");
                break;
            }
        }

        Ok(fragments)
    }

    async fn complete(&self, epoch: u64, turn: TurnId, fragments: usize) -> SubmitOutcome {
        let mut text = None;
        let current = self.update(epoch, true, |state| {
            state.turns.complete(turn);
            state.phase = ExchangeState::Completed;
            text = state.turns.get(turn).map(|t| t.text.clone());
            true
        });
        if !current {
            return SubmitOutcome::Cancelled(turn);
        }

        let text = text.unwrap_or_default();
        tracing::info!(turn = %turn, fragments, chars = text.chars().count(), "answer complete");

        if !text.is_empty()
            && let Some(audio) = &self.audio
        {
            audio.play(turn, text).await;
        }

        self.update(epoch, true, |state| {
            state.phase = ExchangeState::Idle;
            true
        });
        SubmitOutcome::Answered(turn)
    }

    fn fail(&self, epoch: u64, turn: TurnId, error: &str) -> SubmitOutcome {
        tracing::warn!(error, turn = %turn, "answer failed");

        let message = format!("Error: {error}");
        let current = self.update(epoch, true, |state| {
            state.turns.fail(turn, &message);
            state.phase = ExchangeState::Failed;
            true
        });
        if !current {
            return SubmitOutcome::Cancelled(turn);
        }

        self.update(epoch, true, |state| {
            state.phase = ExchangeState::Idle;
            true
        });
        SubmitOutcome::Failed {
            turn,
            error: error.to_string(),
        }
    }

    /// Stop consuming the current answer, keeping what arrived so far
    ///
    /// Returns `false` if no exchange was running.
    pub fn cancel_exchange(&self) -> bool {
        let mut state = self.lock();
        if state.phase == ExchangeState::Idle {
            return false;
        }

        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        true
    }

    /// Read a completed answer aloud again
    ///
    /// Returns `false` if audio is disabled or the turn is not a complete,
    /// non-empty answer.
    pub async fn speak_turn(&self, id: TurnId) -> bool {
        let Some(audio) = &self.audio else {
            return false;
        };

        let text = {
            let state = self.lock();
            state
                .turns
                .get(id)
                .filter(|t| t.role == Role::Assistant && t.complete && !t.failed)
                .map(|t| t.text.clone())
        };

        match text {
            Some(text) if !text.is_empty() => {
                audio.play(id, text).await;
                true
            }
            _ => false,
        }
    }

    /// Stop any audio, waiting for the output to be released
    pub async fn stop_audio(&self) -> bool {
        match &self.audio {
            Some(audio) => audio.stop().await,
            None => false,
        }
    }

    /// Stop the foreground activity: the running answer first, else audio
    ///
    /// Each call stops one thing, so repeated interrupts walk down to
    /// [`Interrupted::Nothing`] once everything is quiet.
    pub async fn interrupt(&self) -> Interrupted {
        if self.cancel_exchange() {
            return Interrupted::Exchange;
        }

        if self.snapshot().audio != AudioState::Idle && self.stop_audio().await {
            return Interrupted::Audio;
        }

        Interrupted::Nothing
    }

    /// Cancel any in-flight answer and release audio
    pub async fn shutdown(&self) {
        self.cancel_exchange();
        self.stop_audio().await;
    }
}

impl Drop for TurnController {
    fn drop(&mut self) {
        self.lock().cancel.cancel();
        if let Some(audio) = &self.audio {
            audio.abort();
        }
    }
}

impl std::fmt::Debug for TurnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TurnController")
            .field("session_id", &state.session_id)
            .field("phase", &state.phase)
            .field("turns", &state.turns.len())
            .field("streaming", &self.streaming)
            .field("audio", &self.audio.is_some())
            .finish_non_exhaustive()
    }
}

/// Returns the controller to idle if a `submit` future is cancelled or
/// dropped before it finishes
struct ExchangeGuard<'a> {
    controller: &'a TurnController,
    epoch: u64,
    turn: TurnId,
    armed: bool,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let turn = self.turn;
        self.controller.update(self.epoch, true, |state| {
            state.turns.complete(turn);
            state.phase = ExchangeState::Idle;
            true
        });
    }
}
