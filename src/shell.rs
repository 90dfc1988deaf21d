//! Terminal rendering for sessions and the chat transcript

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use chrono::{DateTime, NaiveDateTime};

use crate::chat::{ChatSnapshot, Role, TurnId};
use crate::directory::Session;

/// Prompt printed before a user turn
pub const USER_PREFIX: &str = "you> ";

/// Prompt printed before an assistant turn
pub const ASSISTANT_PREFIX: &str = "claire> ";

/// Format a backend timestamp as `dd/mm/yyyy hh:mm`
///
/// Accepts RFC 3339 and naive ISO 8601 (with or without fractional seconds).
/// Anything else is returned as-is.
#[must_use]
pub fn format_timestamp(raw: &str) -> String {
    const DISPLAY: &str = "%d/%m/%Y %H:%M";

    if raw.is_empty() {
        return String::new();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format(DISPLAY).to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.format(DISPLAY).to_string();
    }
    raw.to_string()
}

/// Write the session list, or an empty state
///
/// # Errors
///
/// Returns error if writing fails
pub fn write_sessions<W: Write>(out: &mut W, sessions: &[Session]) -> io::Result<()> {
    if sessions.is_empty() {
        return writeln!(out, "No sessions yet");
    }

    for session in sessions {
        write!(out, "{}  {}", session.session_id, session.name)?;
        if let Some(description) = session.description.as_deref().filter(|d| !d.is_empty()) {
            write!(out, " - {description}")?;
        }
        writeln!(
            out,
            "  ({} conversations, created {})",
            session.conversations.len(),
            format_timestamp(&session.created_at)
        )?;
    }
    Ok(())
}

/// Write one session with its conversations, or an empty state
///
/// # Errors
///
/// Returns error if writing fails
pub fn write_session<W: Write>(out: &mut W, session: &Session) -> io::Result<()> {
    writeln!(out, "{} ({})", session.name, session.session_id)?;
    if let Some(description) = session.description.as_deref().filter(|d| !d.is_empty()) {
        writeln!(out, "{description}")?;
    }
    writeln!(out, "updated {}", format_timestamp(&session.updated_at))?;

    if session.conversations.is_empty() {
        return writeln!(out, "No conversations in this session");
    }

    for conversation in &session.conversations {
        writeln!(
            out,
            "  {}  {}  [{}]",
            conversation.conversation_id,
            format_timestamp(&conversation.added_at),
            conversation.status
        )?;
    }
    Ok(())
}

/// Prints a chat transcript incrementally from successive snapshots
///
/// Only text that was not printed before goes out, so feeding it every
/// snapshot of a streaming answer prints the answer once, as it arrives.
#[derive(Debug)]
pub struct TranscriptPrinter<W> {
    out: W,
    /// Bytes of each turn's text already written
    printed: HashMap<TurnId, usize>,
    closed: HashSet<TurnId>,
    session_id: Option<String>,
}

impl<W: Write> TranscriptPrinter<W> {
    /// Create a printer writing to `out`
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: HashMap::new(),
            closed: HashSet::new(),
            session_id: None,
        }
    }

    /// Print whatever changed since the previous snapshot
    ///
    /// # Errors
    ///
    /// Returns error if writing fails
    pub fn render(&mut self, snapshot: &ChatSnapshot) -> io::Result<()> {
        if snapshot.session_id != self.session_id {
            self.session_id.clone_from(&snapshot.session_id);
            self.printed.clear();
            self.closed.clear();
        }

        for turn in &snapshot.turns {
            if self.closed.contains(&turn.id) {
                continue;
            }

            let printed = self.printed.get(&turn.id).copied();

            match turn.role {
                Role::User => {
                    writeln!(self.out, "{USER_PREFIX}{}", turn.text)?;
                    self.closed.insert(turn.id);
                    continue;
                }
                Role::Assistant => {
                    let start = match printed {
                        None => {
                            write!(self.out, "{ASSISTANT_PREFIX}")?;
                            0
                        }
                        // Failure replaced what was streamed so far
                        Some(n) if turn.failed => {
                            if n > 0 {
                                writeln!(self.out)?;
                                write!(self.out, "{ASSISTANT_PREFIX}")?;
                            }
                            0
                        }
                        Some(n) => n,
                    };

                    if let Some(new_text) = turn.text.get(start..) {
                        write!(self.out, "{new_text}")?;
                    }
                    self.printed.insert(turn.id, turn.text.len());
                }
            }

            if turn.complete {
                writeln!(self.out)?;
                self.closed.insert(turn.id);
            }
        }

        self.out.flush()
    }

    /// Give back the writer
    #[must_use]
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::TurnSequence;
    use crate::directory::Conversation;

    fn snapshot(turns: &TurnSequence) -> ChatSnapshot {
        ChatSnapshot {
            session_id: Some("s-1".to_string()),
            turns: turns.as_slice().to_vec(),
            ..ChatSnapshot::default()
        }
    }

    fn output(printer: TranscriptPrinter<Vec<u8>>) -> String {
        String::from_utf8(printer.into_inner()).unwrap()
    }

    #[test]
    fn streamed_answer_is_printed_once() {
        let mut turns = TurnSequence::new();
        let mut printer = TranscriptPrinter::new(Vec::new());

        turns.push_user("What is X?");
        let id = turns.open_assistant().unwrap();
        printer.render(&snapshot(&turns)).unwrap();

        for fragment in ["X is ", "a concept ", "about Y."] {
            turns.append(id, fragment);
            printer.render(&snapshot(&turns)).unwrap();
        }
        turns.complete(id);
        printer.render(&snapshot(&turns)).unwrap();
        printer.render(&snapshot(&turns)).unwrap();

        assert_eq!(
            output(printer),
            "you> What is X?\nclaire> X is a concept about Y.\n"
        );
    }

    #[test]
    fn failure_after_partial_text_starts_a_new_line() {
        let mut turns = TurnSequence::new();
        let mut printer = TranscriptPrinter::new(Vec::new());

        turns.push_user("q");
        let id = turns.open_assistant().unwrap();
        turns.append(id, "half");
        printer.render(&snapshot(&turns)).unwrap();

        turns.fail(id, "Error: stream error: reset");
        printer.render(&snapshot(&turns)).unwrap();

        assert_eq!(
            output(printer),
            "you> q\nclaire> half\nclaire> Error: stream error: reset\n"
        );
    }

    #[test]
    fn session_change_resets() {
        let mut turns = TurnSequence::new();
        let mut printer = TranscriptPrinter::new(Vec::new());

        turns.push_user("first");
        printer.render(&snapshot(&turns)).unwrap();

        let cleared = ChatSnapshot {
            session_id: Some("s-2".to_string()),
            ..ChatSnapshot::default()
        };
        printer.render(&cleared).unwrap();

        assert_eq!(output(printer), "you> first\n");
    }

    #[test]
    fn timestamps_in_both_backend_shapes() {
        assert_eq!(format_timestamp("2025-03-04T15:06:07.123456"), "04/03/2025 15:06");
        assert_eq!(format_timestamp("2025-03-04T15:06:07"), "04/03/2025 15:06");
        assert_eq!(format_timestamp("2025-03-04T15:06:07+00:00"), "04/03/2025 15:06");
        assert_eq!(format_timestamp("yesterday"), "yesterday");
        assert_eq!(format_timestamp(""), "");
    }

    #[test]
    fn empty_states() {
        let mut out = Vec::new();
        write_sessions(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No sessions yet\n");

        let session = Session {
            session_id: "s-1".to_string(),
            name: "Empty".to_string(),
            description: None,
            created_at: "2025-01-01T00:00:00".to_string(),
            updated_at: "2025-01-01T00:00:00".to_string(),
            conversations_dir: None,
            last_conversation_added: None,
            conversations: Vec::new(),
        };
        let mut out = Vec::new();
        write_session(&mut out, &session).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("No conversations in this session\n"));
    }

    #[test]
    fn session_lists_conversations() {
        let session = Session {
            session_id: "s-1".to_string(),
            name: "Physics".to_string(),
            description: Some("Lecture notes".to_string()),
            created_at: "2025-01-01T00:00:00".to_string(),
            updated_at: "2025-01-02T08:30:00".to_string(),
            conversations_dir: None,
            last_conversation_added: None,
            conversations: vec![Conversation {
                conversation_id: "c-1".to_string(),
                file_path: "data/c-1.txt".to_string(),
                added_at: "2025-01-02T08:30:00".to_string(),
                chunk_count: Some(3),
                status: crate::directory::ConversationStatus::Chunked,
            }],
        };

        let mut out = Vec::new();
        write_session(&mut out, &session).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Physics (s-1)\nLecture notes\nupdated 02/01/2025 08:30\n"));
        assert!(text.contains("  c-1  02/01/2025 08:30  [chunked]\n"));
    }
}
