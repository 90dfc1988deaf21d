//! Session manager data types

use serde::{Deserialize, Serialize};

/// A named collection of conversations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub conversations_dir: Option<String>,
    #[serde(default)]
    pub last_conversation_added: Option<String>,
    /// Conversations in the order the server lists them
    #[serde(default)]
    pub conversations: Vec<Conversation>,
}

impl Session {
    /// Find a conversation by ID
    #[must_use]
    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
    }

    /// Reference to one of this session's conversations
    #[must_use]
    pub fn conversation_ref(&self, conversation: &Conversation) -> ConversationRef {
        ConversationRef::new(&self.session_id, &conversation.conversation_id)
    }
}

/// A conversation stored in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub file_path: String,
    /// Creation timestamp as reported by the server
    pub added_at: String,
    #[serde(default)]
    pub chunk_count: Option<u32>,
    #[serde(default)]
    pub status: ConversationStatus,
}

/// Indexing state of a conversation on the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Pending,
    Chunked,
    Error,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Chunked => "chunked",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Non-owning address of a conversation within its parent session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationRef {
    pub session_id: String,
    pub conversation_id: String,
}

impl ConversationRef {
    /// Create a reference from session and conversation IDs
    #[must_use]
    pub fn new(session_id: &str, conversation_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            conversation_id: conversation_id.to_string(),
        }
    }
}

/// Request to create a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionCreate {
    pub name: String,
    pub description: Option<String>,
}

/// Partial update of a session; unset fields are left unchanged
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SessionUpdate {
    /// Whether the update changes nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }
}

/// Request to add a conversation to a session
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ConversationCreate<'a> {
    pub text: &'a str,
}

/// Plain `{message}` body returned by bulk operations
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_deserializes_with_defaults() {
        let json = r#"{
            "session_id": "s-1",
            "name": "Physics",
            "created_at": "2025-01-10T09:00:00",
            "updated_at": "2025-01-10T09:00:00",
            "conversations_dir": "data/s-1"
        }"#;

        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.session_id, "s-1");
        assert!(session.description.is_none());
        assert!(session.conversations.is_empty());
    }

    #[test]
    fn conversation_status_defaults_to_pending() {
        let json = r#"{
            "conversation_id": "c-1",
            "file_path": "data/s-1/c-1.txt",
            "added_at": "2025-01-10T09:05:00"
        }"#;

        let conversation: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conversation.status, ConversationStatus::Pending);
        assert_eq!(conversation.chunk_count, None);

        let chunked: Conversation = serde_json::from_value(serde_json::json!({
            "conversation_id": "c-2",
            "file_path": "f",
            "added_at": "t",
            "chunk_count": 4,
            "status": "chunked"
        }))
        .unwrap();
        assert_eq!(chunked.status, ConversationStatus::Chunked);
        assert_eq!(chunked.chunk_count, Some(4));
    }

    #[test]
    fn session_update_skips_unset_fields() {
        let update = SessionUpdate {
            name: Some("Renamed".to_string()),
            description: None,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "Renamed" }));
        assert!(SessionUpdate::default().is_empty());
    }

    #[test]
    fn session_create_sends_null_description() {
        let create = SessionCreate {
            name: "Notes".to_string(),
            description: None,
        };
        let json = serde_json::to_value(&create).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "Notes", "description": null }));
    }
}
