//! Inbound chat payload normalization
//!
//! Clients have posted several message shapes over time. They are modelled
//! as a closed set of [`InboundMessage`] variants and mapped to the one
//! canonical backend payload.

use crate::session::SessionId;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Query string of `POST /proxy/chat`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatQuery {
    pub session_id: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id_camel: Option<String>,
    pub broker_id: Option<String>,
    #[serde(rename = "brokerId")]
    pub broker_id_camel: Option<String>,
    /// Client is in new-chat mode (informational)
    pub new_chat: Option<String>,
    /// Client's new-chat instance key (informational)
    pub new_chat_instance: Option<String>,
}

/// The message text, in whichever shape the client sent it.
///
/// Variant order is the lookup priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// `{"message_payload": {"content": ..}}`
    MessagePayload(String),
    /// `{"prompt": {"content": ..}}`
    Prompt(String),
    /// `{"content": ..}`
    Content(String),
    /// `{"message": ..}`
    Message(String),
    /// None of the above; forwarded as empty content
    Empty,
}

impl InboundMessage {
    /// Pick the message out of a request body object.
    ///
    /// Nested `content` fields only count when non-empty; top-level strings
    /// count even when empty.
    pub fn from_body(body: &Map<String, Value>) -> Self {
        let nested = |key: &str| {
            body.get(key)
                .and_then(|v| v.get("content"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let top_level = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);

        if let Some(content) = nested("message_payload") {
            InboundMessage::MessagePayload(content)
        } else if let Some(content) = nested("prompt") {
            InboundMessage::Prompt(content)
        } else if let Some(content) = top_level("content") {
            InboundMessage::Content(content)
        } else if let Some(content) = top_level("message") {
            InboundMessage::Message(content)
        } else {
            InboundMessage::Empty
        }
    }

    pub fn content(&self) -> &str {
        match self {
            InboundMessage::MessagePayload(c)
            | InboundMessage::Prompt(c)
            | InboundMessage::Content(c)
            | InboundMessage::Message(c) => c,
            InboundMessage::Empty => "",
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            InboundMessage::MessagePayload(_) => "message_payload",
            InboundMessage::Prompt(_) => "prompt",
            InboundMessage::Content(_) => "content",
            InboundMessage::Message(_) => "message",
            InboundMessage::Empty => "empty",
        }
    }
}

/// Rejected request body
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed JSON body: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
}

/// A chat request after alias resolution and message normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub session_id: Option<SessionId>,
    pub broker_id: Option<String>,
    pub message: InboundMessage,
}

impl ChatRequest {
    /// Parse query + raw body. An empty body is treated as `{}`.
    ///
    /// Ids are looked up as query `snake_case`, query `camelCase`, body
    /// `snake_case`, body `camelCase`; blank values count as absent.
    pub fn parse(query: &ChatQuery, body: &Bytes) -> Result<Self, PayloadError> {
        let body = if body.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(body)? {
                Value::Object(map) => map,
                _ => return Err(PayloadError::NotAnObject),
            }
        };

        let session_id = first_present(&[
            query.session_id.clone(),
            query.session_id_camel.clone(),
            body_string(&body, "session_id"),
            body_string(&body, "sessionId"),
        ])
        .map(SessionId::from);

        let broker_id = first_present(&[
            query.broker_id.clone(),
            query.broker_id_camel.clone(),
            body_string(&body, "broker_id"),
            body_string(&body, "brokerId"),
        ]);

        Ok(Self {
            session_id,
            broker_id,
            message: InboundMessage::from_body(&body),
        })
    }
}

fn first_present(candidates: &[Option<String>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// String or numeric id from the body
fn body_string(body: &Map<String, Value>, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
