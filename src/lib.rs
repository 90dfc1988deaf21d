//! ClAire client - ask questions about your notes, hear the answers
//!
//! This library provides the client side of the ClAire notes assistant:
//! - Session and conversation management against the session manager API
//! - Streaming answers from the retrieval-augmented question endpoint
//! - A turn controller that runs one exchange at a time per session
//! - Reading completed answers aloud via the backend's TTS endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Shell (claire CLI)                  │
//! │   sessions  │  conversations  │  chat transcript    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ ChatSnapshot (watch)
//! ┌────────────────────▼────────────────────────────────┐
//! │                 TurnController                       │
//! │   turn sequence  │  exchange state  │  audio slot   │
//! └─────────┬──────────────────────────────┬────────────┘
//!           │ AnswerStream                 │ Speaker
//! ┌─────────▼──────────┐        ┌──────────▼────────────┐
//! │ RagClient (stream) │        │ SpeechClient + cpal   │
//! └────────────────────┘        └───────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod directory;
pub mod error;
pub mod shell;
pub mod transport;
pub mod voice;

pub use chat::{
    AudioState, ChatSnapshot, ExchangeState, Interrupted, Role, SubmitOutcome, Turn,
    TurnController, TurnId,
};
pub use config::Config;
pub use directory::{Conversation, ConversationStatus, Session, SessionDirectory, SessionUpdate};
pub use error::{Error, Result};
pub use transport::{AnswerSource, AnswerStream, RagClient, build_http_client};
pub use voice::{AudioOutput, DeviceOutput, Playback, Speaker, SpeechClient, SpeechSynthesizer};
