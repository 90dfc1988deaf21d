//! Turns and the append-only turn sequence

use serde::Serialize;

/// Identifier of a turn, unique for the lifetime of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TurnId(u64);

impl TurnId {
    /// Raw numeric value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One side of a question/answer exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub text: String,
    /// Text will not change any more
    pub complete: bool,
    /// Text was replaced with an error description
    pub failed: bool,
}

/// Ordered, append-only list of turns for the selected session
///
/// At most one assistant turn is open at a time. An open turn's text only
/// grows; the single exception is [`TurnSequence::fail`], which replaces the
/// text and closes the turn.
#[derive(Debug, Clone, Default)]
pub struct TurnSequence {
    turns: Vec<Turn>,
    next_id: u64,
}

impl TurnSequence {
    /// Create an empty sequence
    #[must_use]
    pub const fn new() -> Self {
        Self {
            turns: Vec::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> TurnId {
        let id = TurnId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        id
    }

    /// Append a completed user turn
    pub fn push_user(&mut self, text: &str) -> TurnId {
        let id = self.allocate_id();
        self.turns.push(Turn {
            id,
            role: Role::User,
            text: text.to_string(),
            complete: true,
            failed: false,
        });
        id
    }

    /// Append an empty, open assistant turn
    ///
    /// Returns `None` if an assistant turn is already open.
    pub fn open_assistant(&mut self) -> Option<TurnId> {
        if self.open_turn().is_some() {
            return None;
        }

        let id = self.allocate_id();
        self.turns.push(Turn {
            id,
            role: Role::Assistant,
            text: String::new(),
            complete: false,
            failed: false,
        });
        Some(id)
    }

    /// Append a fragment to an open turn
    ///
    /// Returns `false` if the turn is unknown or already complete.
    pub fn append(&mut self, id: TurnId, fragment: &str) -> bool {
        match self.open_mut(id) {
            Some(turn) => {
                turn.text.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Mark an open turn complete, keeping its text
    pub fn complete(&mut self, id: TurnId) -> bool {
        match self.open_mut(id) {
            Some(turn) => {
                turn.complete = true;
                true
            }
            None => false,
        }
    }

    /// Replace an open turn's text with an error description and close it
    pub fn fail(&mut self, id: TurnId, message: &str) -> bool {
        match self.open_mut(id) {
            Some(turn) => {
                turn.text = message.to_string();
                turn.complete = true;
                turn.failed = true;
                true
            }
            None => false,
        }
    }

    fn open_mut(&mut self, id: TurnId) -> Option<&mut Turn> {
        self.turns
            .iter_mut()
            .rev()
            .find(|t| t.id == id)
            .filter(|t| !t.complete)
    }

    /// The open assistant turn, if any
    #[must_use]
    pub fn open_turn(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant && !t.complete)
    }

    /// Look up a turn
    #[must_use]
    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.id == id)
    }

    /// Most recent complete assistant turn that did not fail
    #[must_use]
    pub fn last_answer(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant && t.complete && !t.failed)
    }

    /// Remove all turns; identifiers keep counting up
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// All turns in order
    #[must_use]
    pub fn as_slice(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
