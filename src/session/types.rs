//! Session identity types

use crate::backend::BackendError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Opaque, server-assigned conversation identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// `None` for blank identifiers, which count as "no session"
    pub fn non_empty(id: impl Into<String>) -> Option<Self> {
        let id = Self::new(id);
        (!id.is_empty()).then_some(id)
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where the active session identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Supplied by the caller or the navigation state
    Explicit,
    /// Created by the coordinator on first send
    Derived,
}

/// A resolved session held by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub provenance: Provenance,
}

impl Session {
    pub fn explicit(id: SessionId) -> Self {
        Self {
            id,
            provenance: Provenance::Explicit,
        }
    }

    pub fn derived(id: SessionId) -> Self {
        Self {
            id,
            provenance: Provenance::Derived,
        }
    }
}

/// Local placeholder key for a conversation that has no backend session yet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NewChatInstance(String);

impl NewChatInstance {
    pub fn new() -> Self {
        Self(format!("new-chat-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NewChatInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NewChatInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Re-render key of the on-screen conversation.
///
/// Stays stable across the pending → resolved transition of a new chat, so
/// the renderer does not remount and drop the first message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatKey {
    Session(SessionId),
    Instance(NewChatInstance),
    Default,
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatKey::Session(id) => write!(f, "{}", id),
            ChatKey::Instance(instance) => write!(f, "{}", instance),
            ChatKey::Default => f.write_str("chat-default"),
        }
    }
}

/// Session state as read from (or written to) the surrounding navigation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalSessionState {
    pub session_id: Option<SessionId>,
    /// Caller explicitly asked for a fresh, session-less chat
    pub new_chat: bool,
}

impl ExternalSessionState {
    pub fn session(id: impl Into<SessionId>) -> Self {
        Self {
            session_id: Some(id.into()),
            new_chat: false,
        }
    }

    pub fn new_chat() -> Self {
        Self {
            session_id: None,
            new_chat: true,
        }
    }
}

/// Outcome of reconciling an out-of-band session change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Canonical id for the conversation just created; chat key kept
    Continued,
    /// A different conversation; local message state was reset
    Switched,
    /// Fresh new-chat instance minted
    FreshChat,
    /// Nothing to do
    Unchanged,
}

/// Point-in-time view of the coordinator, for renderers and diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    pub chat_key: ChatKey,
    pub new_chat_mode: bool,
    /// A creation request is in flight
    pub pending: bool,
    /// The current id has been reported upstream
    pub reported: bool,
}

/// Session creation failed. Cloned to every waiter of the shared request.
#[derive(Debug, Clone, Error)]
#[error("session creation failed: {0}")]
pub struct SessionError(#[source] Arc<BackendError>);

impl SessionError {
    pub fn backend_error(&self) -> &BackendError {
        &self.0
    }
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        Self(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_session_id_is_empty() {
        assert!(SessionId::from("").is_empty());
        assert!(SessionId::from("  ").is_empty());
        assert!(SessionId::non_empty("").is_none());
        assert_eq!(SessionId::non_empty("s1"), Some(SessionId::from("s1")));
    }

    #[test]
    fn test_session_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&SessionId::from("s1")).unwrap();
        assert_eq!(json, "\"s1\"");
    }

    #[test]
    fn test_new_chat_instances_are_unique() {
        let a = NewChatInstance::new();
        let b = NewChatInstance::new();
        assert!(a.as_str().starts_with("new-chat-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_chat_key_display() {
        assert_eq!(ChatKey::Default.to_string(), "chat-default");
        assert_eq!(ChatKey::Session("s9".into()).to_string(), "s9");
    }

    #[test]
    fn test_session_error_keeps_backend_cause() {
        let err = SessionError::from(BackendError::Cancelled);
        let copy = err.clone();
        assert!(matches!(copy.backend_error(), BackendError::Cancelled));
        assert_eq!(err.to_string(), "session creation failed: backend call cancelled");
    }
}
