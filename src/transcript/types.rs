//! Transcript data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Author of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Backend `message_type`: `ai` (any case) is the assistant, anything else the user
    pub fn from_message_type(message_type: Option<&str>) -> Self {
        match message_type {
            Some(t) if t.trim().eq_ignore_ascii_case("ai") => Role::Assistant,
            _ => Role::User,
        }
    }

    /// Lenient role name used by legacy log entries
    pub fn parse_loose(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" | "bot" => Some(Role::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One rendered transcript message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Backend-assigned, monotonic per session
    #[serde(default)]
    pub seq: i64,
    /// Content is still being appended
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>, seq: i64) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            seq,
            streaming: false,
            timestamp: None,
        }
    }
}

/// One entry of the backend session log (`GET /session/{id}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub seq_no: i64,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub message_payload: Option<String>,
}

impl From<LogEntry> for Message {
    fn from(entry: LogEntry) -> Self {
        let role = Role::from_message_type(entry.message_type.as_deref());
        let id = entry
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| fallback_id(entry.seq_no));
        Message::new(id, role, entry.message_payload.unwrap_or_default(), entry.seq_no)
    }
}

pub(crate) fn fallback_id(seq: i64) -> String {
    format!("msg-{}", seq)
}

/// Backends have sent both numeric and string ids
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Legacy log entry: one turn, JSON- or plain-text-encoded.
///
/// Recognized JSON forms are `{"role": .., "content": ..}` and single-key
/// objects such as `{"user": "hi"}`. Anything else is plain text without a
/// role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEntry(pub String);

/// A legacy entry after parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTurn {
    pub role: Option<Role>,
    pub content: String,
}

impl RawEntry {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn parse(&self) -> ParsedTurn {
        let plain = || ParsedTurn {
            role: None,
            content: self.0.clone(),
        };

        let value: serde_json::Value = match serde_json::from_str(&self.0) {
            Ok(value) => value,
            Err(_) => return plain(),
        };

        match value {
            serde_json::Value::Object(map) => {
                if let Some(role) = map.get("role").and_then(|r| r.as_str()) {
                    let content = map.get("content").map(text_of).unwrap_or_default();
                    return ParsedTurn {
                        role: Role::parse_loose(role),
                        content,
                    };
                }
                if map.len() == 1 {
                    if let Some((key, content)) = map.iter().next() {
                        if let Some(role) = Role::parse_loose(key) {
                            return ParsedTurn {
                                role: Some(role),
                                content: text_of(content),
                            };
                        }
                    }
                }
                plain()
            }
            serde_json::Value::String(text) => ParsedTurn {
                role: None,
                content: text,
            },
            _ => plain(),
        }
    }
}

impl From<&Message> for RawEntry {
    fn from(message: &Message) -> Self {
        let value = serde_json::json!({
            "role": message.role.as_str(),
            "content": message.content,
        });
        RawEntry(value.to_string())
    }
}

fn text_of(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_message_type() {
        assert_eq!(Role::from_message_type(Some("AI")), Role::Assistant);
        assert_eq!(Role::from_message_type(Some("human")), Role::User);
        assert_eq!(Role::from_message_type(None), Role::User);
    }

    #[test]
    fn test_log_entry_numeric_id_and_fallback() {
        let entry: LogEntry =
            serde_json::from_str(r#"{"id":42,"seq_no":3,"message_type":"ai","message_payload":"yo"}"#)
                .unwrap();
        let message = Message::from(entry);
        assert_eq!(message.id, "42");
        assert_eq!(message.role, Role::Assistant);

        let bare: LogEntry = serde_json::from_str(r#"{"seq_no":7}"#).unwrap();
        let message = Message::from(bare);
        assert_eq!(message.id, "msg-7");
        assert_eq!(message.content, "");
        assert_eq!(message.role, Role::User);
    }

    #[test]
    fn test_raw_entry_forms() {
        assert_eq!(
            RawEntry::new(r#"{"user":"hi"}"#).parse(),
            ParsedTurn {
                role: Some(Role::User),
                content: "hi".into()
            }
        );
        assert_eq!(
            RawEntry::new(r#"{"role":"assistant","content":"hello"}"#).parse().role,
            Some(Role::Assistant)
        );
        assert_eq!(
            RawEntry::new("just text {").parse(),
            ParsedTurn {
                role: None,
                content: "just text {".into()
            }
        );
        assert_eq!(RawEntry::new(r#""quoted""#).parse().content, "quoted");
    }

    #[test]
    fn test_raw_entry_from_message_round_trips_role() {
        let message = Message::new("x", Role::Assistant, "ok", 2);
        let parsed = RawEntry::from(&message).parse();
        assert_eq!(parsed.role, Some(Role::Assistant));
        assert_eq!(parsed.content, "ok");
    }
}
