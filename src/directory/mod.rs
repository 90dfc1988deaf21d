//! Session manager client
//!
//! CRUD over sessions and their conversations, plus an LRU cache of
//! conversation content that is invalidated whenever the conversation (or
//! its session) is deleted.

mod types;

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use reqwest::{Client, Response, StatusCode};

use crate::{Error, Result};

pub use types::{
    Conversation, ConversationRef, ConversationStatus, Session, SessionCreate, SessionUpdate,
};
use types::{ConversationCreate, MessageResponse};

/// Route prefix of the session manager API
pub const SESSION_MANAGER_PATH: &str = "/api/session-manager";

/// Default number of conversation bodies kept in memory
pub const DEFAULT_CONTENT_CACHE: usize = 64;

/// Client for the session manager API
pub struct SessionDirectory {
    client: Client,
    base_url: String,
    content: Mutex<LruCache<ConversationRef, String>>,
}

impl SessionDirectory {
    /// Create a new session directory client
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `base_url` - Backend origin (e.g., `http://localhost:8000`)
    /// * `cache_entries` - Conversation bodies to keep cached (min 1)
    #[must_use]
    pub fn new(client: Client, base_url: &str, cache_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            base_url: format!(
                "{}{SESSION_MANAGER_PATH}",
                base_url.trim_end_matches('/')
            ),
            content: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}/sessions", self.base_url)
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, urlencoding::encode(session_id))
    }

    fn conversation_url(&self, session_id: &str, conversation_id: &str) -> String {
        format!(
            "{}/conversations/{}",
            self.session_url(session_id),
            urlencoding::encode(conversation_id)
        )
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<ConversationRef, String>> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// List all sessions
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is invalid
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let response = self.client.get(self.sessions_url()).send().await?;
        let response = check(response, "fetch sessions").await?;
        Ok(response.json().await?)
    }

    /// Get a session with its conversations
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the session does not exist
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let response = self.client.get(self.session_url(session_id)).send().await?;
        let response = check(response, "fetch session").await?;
        Ok(response.json().await?)
    }

    /// Create a session
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is invalid
    pub async fn create_session(&self, name: &str, description: Option<&str>) -> Result<Session> {
        let request = SessionCreate {
            name: name.to_string(),
            description: description.map(str::to_string),
        };

        let response = self
            .client
            .post(self.sessions_url())
            .json(&request)
            .send()
            .await?;
        let response = check(response, "create session").await?;
        let session: Session = response.json().await?;

        tracing::info!(session_id = %session.session_id, name, "session created");
        Ok(session)
    }

    /// Update a session's name and/or description
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the session does not exist
    pub async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<Session> {
        let response = self
            .client
            .put(self.session_url(session_id))
            .json(update)
            .send()
            .await?;
        let response = check(response, "update session").await?;
        Ok(response.json().await?)
    }

    /// Delete a session and all of its conversations
    ///
    /// Returns `true` when the server answered 204 No Content.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the session does not exist
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.session_url(session_id))
            .send()
            .await?;
        let response = check(response, "delete session").await?;

        let evicted = self.evict_session(session_id);
        tracing::info!(session_id, evicted, "session deleted");
        Ok(response.status() == StatusCode::NO_CONTENT)
    }

    /// Delete every session
    ///
    /// Returns the server's summary message.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails
    pub async fn delete_all_sessions(&self) -> Result<String> {
        let response = self.client.delete(self.sessions_url()).send().await?;
        let response = check(response, "delete all sessions").await?;
        let body: MessageResponse = response.json().await?;

        self.cache().clear();
        tracing::info!(message = %body.message, "all sessions deleted");
        Ok(body.message)
    }

    /// Add a conversation to a session
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the session does not exist
    pub async fn add_conversation(&self, session_id: &str, text: &str) -> Result<Conversation> {
        let response = self
            .client
            .post(format!("{}/conversations", self.session_url(session_id)))
            .json(&ConversationCreate { text })
            .send()
            .await?;
        let response = check(response, "add conversation").await?;
        let conversation: Conversation = response.json().await?;

        tracing::info!(
            session_id,
            conversation_id = %conversation.conversation_id,
            "conversation added"
        );
        Ok(conversation)
    }

    /// Get a conversation's metadata
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the conversation does not exist
    pub async fn get_conversation(
        &self,
        session_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation> {
        let response = self
            .client
            .get(self.conversation_url(session_id, conversation_id))
            .send()
            .await?;
        let response = check(response, "fetch conversation").await?;
        Ok(response.json().await?)
    }

    /// Get a conversation's raw text, from cache when available
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the conversation does not exist
    pub async fn conversation_content(
        &self,
        session_id: &str,
        conversation_id: &str,
    ) -> Result<String> {
        let key = ConversationRef::new(session_id, conversation_id);

        let cached = self.cache().get(&key).cloned();
        if let Some(text) = cached {
            tracing::debug!(session_id, conversation_id, "conversation content cache hit");
            return Ok(text);
        }

        let response = self
            .client
            .get(format!(
                "{}/content",
                self.conversation_url(session_id, conversation_id)
            ))
            .send()
            .await?;
        let response = check(response, "fetch conversation content").await?;
        let text = response.text().await?;

        self.cache().put(key, text.clone());
        Ok(text)
    }

    /// Delete a conversation
    ///
    /// Returns `true` when the server answered 204 No Content.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the conversation does not exist
    pub async fn delete_conversation(
        &self,
        session_id: &str,
        conversation_id: &str,
    ) -> Result<bool> {
        let response = self
            .client
            .delete(self.conversation_url(session_id, conversation_id))
            .send()
            .await?;
        let response = check(response, "delete conversation").await?;

        self.cache()
            .pop(&ConversationRef::new(session_id, conversation_id));
        tracing::info!(session_id, conversation_id, "conversation deleted");
        Ok(response.status() == StatusCode::NO_CONTENT)
    }

    /// Whether a conversation's content is currently cached
    #[must_use]
    pub fn is_cached(&self, session_id: &str, conversation_id: &str) -> bool {
        self.cache()
            .contains(&ConversationRef::new(session_id, conversation_id))
    }

    /// Drop every cached body belonging to a session
    fn evict_session(&self, session_id: &str) -> usize {
        let mut cache = self.cache();
        let stale: Vec<ConversationRef> = cache
            .iter()
            .filter(|(key, _)| key.session_id == session_id)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            cache.pop(key);
        }
        stale.len()
    }
}

impl std::fmt::Debug for SessionDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDirectory")
            .field("base_url", &self.base_url)
            .field("cached", &self.cache().len())
            .finish_non_exhaustive()
    }
}

/// Turn a non-success status into a directory error
async fn check(response: Response, action: &'static str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, body = %body, action, "session manager error");
    Err(Error::Directory {
        action,
        status: status.as_u16(),
    })
}
