//! Live transcript the UI appends to while a conversation runs

use super::reconcile::reconcile;
use super::types::{Message, Role};
use chrono::Utc;
use uuid::Uuid;

/// Text shown in place of an assistant reply that failed mid-flight
pub const APOLOGY_TEXT: &str = "Sorry, an error occurred. Please try again.";

/// Ordered, append-only transcript of one conversation.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a reconciled backend log
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: reconcile(messages),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Replace the contents with a fetched log
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = reconcile(messages);
    }

    fn next_seq(&self) -> i64 {
        self.messages.last().map_or(1, |m| m.seq.saturating_add(1))
    }

    fn push(&mut self, role: Role, content: String, streaming: bool) -> String {
        let id = format!("local-{}", Uuid::new_v4());
        let mut message = Message::new(id.clone(), role, content, self.next_seq());
        message.streaming = streaming;
        message.timestamp = Some(Utc::now());
        self.messages.push(message);
        id
    }

    /// Append the user's message; returns its local id
    pub fn push_user(&mut self, content: impl Into<String>) -> String {
        self.push(Role::User, content.into(), false)
    }

    /// Open an empty streaming assistant message
    pub fn begin_assistant(&mut self) -> String {
        self.push(Role::Assistant, String::new(), true)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Append streamed text. `false` if the message is gone or already complete.
    pub fn append(&mut self, id: &str, chunk: &str) -> bool {
        match self.get_mut(id) {
            Some(message) if message.streaming => {
                message.content.push_str(chunk);
                true
            }
            _ => false,
        }
    }

    /// Mark a streaming message complete, optionally replacing its text
    pub fn complete(&mut self, id: &str, content: Option<String>) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                if let Some(content) = content {
                    message.content = content;
                }
                message.streaming = false;
                true
            }
            None => false,
        }
    }

    /// Replace a failed reply with the apology text
    pub fn fail(&mut self, id: &str) -> bool {
        self.complete(id, Some(APOLOGY_TEXT.to_string()))
    }
}
