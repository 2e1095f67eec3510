//! Conversation state threaded through every node

use docent_ai::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies one conversation; all checkpoints are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(Uuid);

impl ThreadId {
    /// A fresh, process-wide unique thread id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ThreadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for ThreadId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Outcome of the last intent classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentFlag {
    Ticket,
    Museum,
    /// Not yet classified this turn, or classified out of scope
    #[default]
    Undetermined,
}

/// The single mutable record carried through the graph for one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Append-only transcript of user and assistant entries
    pub messages: Vec<Message>,
    /// Latest raw user utterance for the current turn
    pub user_message: String,
    pub intent: IntentFlag,
    /// Redirect text when the last classification was out of scope; empty otherwise
    pub out_of_scope_message: String,
    /// Answers gathered from the user during the current booking attempt
    pub collected_details: Vec<String>,
    /// True between an interrupt being raised and its resume value arriving
    pub awaiting_input: bool,
}

impl ConversationState {
    /// Open a new top-level turn with the user's utterance.
    pub fn begin_turn(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.messages.push(Message::user(text.clone()));
        self.user_message = text;
        self.intent = IntentFlag::Undetermined;
        self.out_of_scope_message.clear();
        self.awaiting_input = false;
    }

    /// Start a fresh booking attempt; details from an earlier attempt are dropped.
    pub fn begin_booking_attempt(&mut self) {
        self.collected_details.clear();
    }

    /// Record an answer supplied by the user while the booking dialog was suspended.
    pub fn apply_answer(&mut self, answer: impl Into<String>) {
        let answer = answer.into();
        self.messages.push(Message::user(answer.clone()));
        self.collected_details.push(answer.clone());
        self.user_message = answer;
        self.awaiting_input = false;
    }

    /// Append an assistant-authored entry to the transcript.
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    /// Text of the most recent assistant entry, if any
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .map(|m| m.text())
    }

    /// Transcript handed to capabilities. The current utterance is appended when
    /// the transcript does not already end with it.
    pub fn history(&self) -> Vec<Message> {
        let mut history = self.messages.clone();
        let ends_with_utterance = history
            .iter()
            .rev()
            .find(|m| m.is_user())
            .is_some_and(|m| m.text() == self.user_message);
        if !self.user_message.is_empty() && !ends_with_utterance {
            history.push(Message::user(self.user_message.clone()));
        }
        history
    }
}
