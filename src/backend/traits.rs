//! Backend collaborator traits and wire types
//!
//! The coordinator treats the chat/session service as an opaque HTTP
//! collaborator. These traits follow the usual `async_trait + Send + Sync`
//! shape so the proxy can hold an `Arc<dyn ChatBackend>` and tests can swap
//! in [`MockBackend`](super::MockBackend).

use super::BackendError;
use crate::session::SessionId;
use crate::transcript::LogEntry;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Body of a backend reply, delivered chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// Per-call context forwarded with every backend request.
#[derive(Debug, Clone, Default)]
pub struct ForwardContext {
    /// Caller's `Cookie` header, relayed verbatim
    pub cookie: Option<String>,
    /// Fires when the caller goes away; in-flight calls abort on it
    pub cancel: CancellationToken,
}

impl ForwardContext {
    pub fn new(cookie: Option<String>, cancel: CancellationToken) -> Self {
        Self { cookie, cancel }
    }
}

/// `POST /session` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

/// One entry of `GET /session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    #[serde(default)]
    pub started_at: String,
}

/// `GET /session` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionList {
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
}

/// `GET /session/{id}` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLog {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub messages: Vec<LogEntry>,
}

/// Inner `message_payload` object of a chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub content: String,
}

/// Canonical outbound chat request (`POST /chat`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message_payload: MessagePayload,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
}

impl ChatPayload {
    pub fn new(content: impl Into<String>, session_id: SessionId, broker_id: Option<String>) -> Self {
        Self {
            message_payload: MessagePayload {
                content: content.into(),
            },
            session_id,
            broker_id,
        }
    }
}

/// How the backend chose to answer a chat request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// `text/event-stream`: relay incrementally
    EventStream,
    /// Anything else: buffer the whole payload
    Complete,
}

/// Backend answer to `POST /chat`, headers received, body not yet read.
pub struct BackendReply {
    pub status: StatusCode,
    pub kind: ReplyKind,
    pub body: ByteStream,
}

impl BackendReply {
    pub fn is_event_stream(&self) -> bool {
        self.kind == ReplyKind::EventStream
    }

    /// Await the complete body.
    pub async fn into_bytes(self) -> Result<Bytes, BackendError> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(chunks.concat().into())
    }
}

impl std::fmt::Debug for BackendReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendReply")
            .field("status", &self.status)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Request relayed verbatim by the generic pass-through proxy
#[derive(Debug, Clone)]
pub struct PassthroughRequest {
    pub method: Method,
    /// Path below the pass-through prefix, without leading slash
    pub path: String,
    /// Raw query string, without `?`
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Response relayed verbatim by the generic pass-through proxy
#[derive(Debug, Clone)]
pub struct PassthroughResponse {
    pub status: StatusCode,
    /// Relayable headers; `set-cookie` may repeat
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Anything that can mint a new backend session.
///
/// Implemented by the server-side backend client and by the UI-side proxy
/// client, so [`SessionCoordinator`](crate::session::SessionCoordinator) works
/// on both sides.
#[async_trait]
pub trait SessionCreator: Send + Sync {
    /// Create a session and return its identifier.
    ///
    /// # Errors
    ///
    /// Transport failures, non-2xx answers, and answers without a usable
    /// `session_id`.
    async fn create_session(&self, ctx: &ForwardContext) -> Result<CreatedSession, BackendError>;
}

/// Full backend surface used by the proxy.
#[async_trait]
pub trait ChatBackend: SessionCreator {
    /// Forward a chat message. Returns once response headers are in.
    async fn send_chat(
        &self,
        payload: &ChatPayload,
        ctx: &ForwardContext,
    ) -> Result<BackendReply, BackendError>;

    /// List the caller's sessions.
    async fn list_sessions(&self, ctx: &ForwardContext)
        -> Result<Vec<SessionSummary>, BackendError>;

    /// Fetch one session's message log; `None` when the backend answers 404.
    async fn get_session(
        &self,
        session_id: &SessionId,
        ctx: &ForwardContext,
    ) -> Result<Option<SessionLog>, BackendError>;

    /// Relay an arbitrary request below the pass-through prefix.
    async fn passthrough(
        &self,
        request: PassthroughRequest,
        ctx: &ForwardContext,
    ) -> Result<PassthroughResponse, BackendError>;

    /// Human-readable target of a pass-through path (for 502 diagnostics)
    fn passthrough_target(&self, path: &str, query: Option<&str>) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_payload_wire_shape() {
        let payload = ChatPayload::new("hello", SessionId::from("s1"), Some("b1".into()));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message_payload": {"content": "hello"},
                "session_id": "s1",
                "broker_id": "b1"
            })
        );
    }

    #[test]
    fn test_chat_payload_without_broker_omits_field() {
        let payload = ChatPayload::new("hi", SessionId::from("s1"), None);
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("broker_id").is_none());
    }

    #[test]
    fn test_session_log_tolerates_missing_fields() {
        let log: SessionLog = serde_json::from_str(r#"{"messages":[{"seq_no":2}]}"#).unwrap();
        assert!(log.session_id.is_none());
        assert_eq!(log.messages.len(), 1);
        assert_eq!(log.messages[0].seq_no, 2);
    }

    #[tokio::test]
    async fn test_reply_into_bytes_concatenates_chunks() {
        let reply = BackendReply {
            status: StatusCode::OK,
            kind: ReplyKind::Complete,
            body: Box::pin(futures::stream::iter(vec![
                Ok(Bytes::from_static(b"{\"content\":")),
                Ok(Bytes::from_static(b"\"hi\"}")),
            ])),
        };
        assert!(!reply.is_event_stream());
        let bytes = reply.into_bytes().await.unwrap();
        assert_eq!(&bytes[..], b"{\"content\":\"hi\"}");
    }
}
