//! UI-side chat client
//!
//! Drives one conversation against a running coordinator: resolves the
//! session through a [`SessionCoordinator`], posts the message to the chat
//! endpoint, and appends the streamed reply to the conversation transcript.

use super::creator::ProxySessionCreator;
use crate::backend::{ForwardContext, SessionList, SessionSummary};
use crate::proxy::SESSION_ID_HEADER;
use crate::session::{
    chat_endpoint_for, ChatKey, MemoryNavigation, Navigation, Reconciliation, SessionCoordinator,
    SessionError, SessionId,
};
use crate::stream::{Sanitizer, SanitizerKind, SseDataDecoder};
use crate::transcript::Message;
use futures::StreamExt;
use reqwest::{header, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shown when a buffered reply carries no text
const NO_RESPONSE: &str = "No response";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("request to coordinator failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("coordinator returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid coordinator URL: {0}")]
    Url(#[from] url::ParseError),

    /// The view moved to another conversation while the session resolved
    #[error("conversation switched before the message to session {session_id} was sent")]
    Superseded { session_id: SessionId },
}

/// Assistant reply to one [`ChatClient::send`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub session_id: SessionId,
    pub content: String,
}

#[derive(Serialize)]
struct OutgoingContent<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct OutgoingChat<'a> {
    message_payload: OutgoingContent<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    broker_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranscriptBody {
    #[serde(default)]
    messages: Vec<Message>,
}

/// Builder for [`ChatClient`]
pub struct ChatClientBuilder {
    base_url: String,
    navigation: Option<Arc<dyn Navigation>>,
    broker_id: Option<String>,
    cookie: Option<String>,
    sanitizer: Arc<dyn Sanitizer>,
    on_created: Option<Box<dyn Fn(&SessionId) + Send + Sync>>,
}

impl ChatClientBuilder {
    pub fn navigation(mut self, navigation: Arc<dyn Navigation>) -> Self {
        self.navigation = Some(navigation);
        self
    }

    pub fn broker_id(mut self, broker_id: impl Into<String>) -> Self {
        self.broker_id = Some(broker_id.into()).filter(|b: &String| !b.trim().is_empty());
        self
    }

    /// Cookie sent with every request, session creation included
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn on_session_created(
        mut self,
        callback: impl Fn(&SessionId) + Send + Sync + 'static,
    ) -> Self {
        self.on_created = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Result<ChatClient, ClientError> {
        let http = reqwest::Client::builder().build()?;
        let base_url = self.base_url.trim_end_matches('/').to_string();
        // Reject garbage early rather than on the first send
        url::Url::parse(&base_url)?;

        let navigation = self
            .navigation
            .unwrap_or_else(|| Arc::new(MemoryNavigation::default()));
        let creator = Arc::new(ProxySessionCreator::new(http.clone(), &base_url));
        let mut builder = SessionCoordinator::builder(creator)
            .navigation(navigation)
            .context(ForwardContext::new(
                self.cookie.clone(),
                CancellationToken::new(),
            ));
        if let Some(callback) = self.on_created {
            builder = builder.on_session_created(callback);
        }

        Ok(ChatClient {
            http,
            base_url,
            coordinator: builder.build(),
            sanitizer: self.sanitizer,
            broker_id: self.broker_id,
            cookie: self.cookie,
        })
    }
}

/// One conversation view talking to the coordinator.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    coordinator: SessionCoordinator,
    sanitizer: Arc<dyn Sanitizer>,
    broker_id: Option<String>,
    cookie: Option<String>,
}

impl ChatClient {
    pub fn builder(base_url: impl Into<String>) -> ChatClientBuilder {
        ChatClientBuilder {
            base_url: base_url.into(),
            navigation: None,
            broker_id: None,
            cookie: None,
            sanitizer: SanitizerKind::Emoji.build(),
            on_created: None,
        }
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.coordinator.transcript()
    }

    pub fn chat_key(&self) -> ChatKey {
        self.coordinator.chat_key()
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.cookie.as_deref() {
            Some(cookie) if !cookie.is_empty() => builder.header(header::COOKIE, cookie),
            _ => builder,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<url::Url, ClientError> {
        let mut url = url::Url::parse(&self.base_url)?;
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// Send a message and wait for the full reply
    pub async fn send(&self, content: &str) -> Result<ChatReply, ClientError> {
        self.send_streaming(content, |_| {}).await
    }

    /// Send a message, handing each sanitized reply fragment to `on_chunk`.
    ///
    /// On failure the pending assistant message is replaced with the apology
    /// text and the error is returned.
    pub async fn send_streaming(
        &self,
        content: &str,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<ChatReply, ClientError> {
        let reply_id = self.coordinator.with_transcript(|t| {
            t.push_user(content);
            t.begin_assistant()
        });

        match self.exchange(content, &reply_id, &mut on_chunk).await {
            Ok(reply) => {
                self.coordinator
                    .with_transcript(|t| t.complete(&reply_id, Some(reply.content.clone())));
                Ok(reply)
            }
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                self.coordinator.with_transcript(|t| t.fail(&reply_id));
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        content: &str,
        reply_id: &str,
        on_chunk: &mut impl FnMut(&str),
    ) -> Result<ChatReply, ClientError> {
        let session_id = self.coordinator.ensure_session_id().await?;
        if self.coordinator.active_session_id().as_ref() != Some(&session_id) {
            return Err(ClientError::Superseded { session_id });
        }
        let url = format!("{}{}", self.base_url, chat_endpoint_for(&session_id));
        let payload = OutgoingChat {
            message_payload: OutgoingContent { content },
            broker_id: self.broker_id.as_deref(),
        };

        let response = self.request(self.http.post(&url)).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        let echoed = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(SessionId::from)
            .filter(|id| !id.is_empty());
        let session_id = match echoed {
            Some(id) => {
                self.coordinator.notify_session_created(&id);
                let outcome = self
                    .coordinator
                    .observe_external_session_change(Some(id.clone()), false);
                if outcome == Reconciliation::Switched {
                    debug!(session_id = %id, "Coordinator answered on a different session");
                }
                id
            }
            None => session_id,
        };

        let streaming = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        let content = if streaming {
            let mut decoder = SseDataDecoder::new();
            let mut text = String::new();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                for data in decoder.push(&chunk?) {
                    self.deliver(reply_id, &data, &mut text, on_chunk);
                }
            }
            for data in decoder.finish() {
                self.deliver(reply_id, &data, &mut text, on_chunk);
            }
            text
        } else {
            let value: serde_json::Value = response.json().await?;
            let text = value
                .get("content")
                .and_then(|v| v.as_str())
                .or_else(|| value.get("message").and_then(|v| v.as_str()))
                .unwrap_or(NO_RESPONSE);
            let text = self.sanitizer.sanitize(text);
            on_chunk(&text);
            text
        };

        Ok(ChatReply {
            session_id,
            content,
        })
    }

    fn deliver(&self, reply_id: &str, data: &str, text: &mut String, on_chunk: &mut impl FnMut(&str)) {
        let clean = self.sanitizer.sanitize(data);
        self.coordinator.with_transcript(|t| t.append(reply_id, &clean));
        text.push_str(&clean);
        on_chunk(&clean);
    }

    /// Fetch the reconciled transcript of `session_id` and show it
    pub async fn load_history(&self, session_id: &SessionId) -> Result<Vec<Message>, ClientError> {
        let url = self.url(&["sessions", session_id.as_str(), "transcript"])?;
        let response = self.request(self.http.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        let body: TranscriptBody = response.json().await?;
        self.coordinator.load_transcript(body.messages);
        Ok(self.coordinator.transcript())
    }

    /// Switch the view to an existing session and load its history
    pub async fn open_session(&self, session_id: &SessionId) -> Result<Vec<Message>, ClientError> {
        self.coordinator
            .observe_external_session_change(Some(session_id.clone()), false);
        self.load_history(session_id).await
    }

    /// Start a fresh, not-yet-persisted conversation
    pub fn new_chat(&self) -> Reconciliation {
        self.coordinator.observe_external_session_change(None, true)
    }

    /// Sessions known to the backend; empty when it is unavailable
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ClientError> {
        let url = self.url(&["sessions"])?;
        let response = self.request(self.http.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(response.json::<SessionList>().await?.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ExternalSessionState;
    use crate::transcript::{Role, APOLOGY_TEXT};
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_session_create(server: &MockServer, id: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"session_id": id})),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    fn sse(status: u16, id: &str, body: &str) -> ResponseTemplate {
        ResponseTemplate::new(status)
            .insert_header(SESSION_ID_HEADER, id)
            .set_body_raw(body.to_string(), "text/event-stream")
    }

    #[tokio::test]
    async fn test_streamed_reply_lands_in_transcript() {
        let server = MockServer::start().await;
        mount_session_create(&server, "s1", 1).await;
        Mock::given(method("POST"))
            .and(path("/proxy/chat"))
            .and(query_param("session_id", "s1"))
            .and(body_json(serde_json::json!({
                "message_payload": {"content": "hi"},
                "broker_id": "b1"
            })))
            .respond_with(sse(200, "s1", "data: Hel\n\ndata: lo!\n\ndata: [DONE]\n\n"))
            .expect(1)
            .mount(&server)
            .await;

        let navigation = Arc::new(MemoryNavigation::default());
        let client = ChatClient::builder(server.uri())
            .navigation(navigation.clone())
            .broker_id("b1")
            .build()
            .unwrap();

        let mut chunks = Vec::new();
        let reply = client
            .send_streaming("hi", |c| chunks.push(c.to_string()))
            .await
            .unwrap();

        assert_eq!(reply.content, "Hello!");
        assert_eq!(reply.session_id.as_str(), "s1");
        assert_eq!(chunks, vec!["Hel", "lo!"]);
        assert_eq!(navigation.replaced(), vec![SessionId::from("s1")]);

        let transcript = client.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].content, "hi");
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[1].content, "Hello!");
        assert!(!transcript[1].streaming);
    }

    #[tokio::test]
    async fn test_concurrent_sends_share_one_creation() {
        let server = MockServer::start().await;
        mount_session_create(&server, "s1", 1).await;
        Mock::given(method("POST"))
            .and(path("/proxy/chat"))
            .and(query_param("session_id", "s1"))
            .respond_with(sse(200, "s1", "data: ok\n\n"))
            .expect(2)
            .mount(&server)
            .await;

        let client = ChatClient::builder(server.uri()).build().unwrap();
        let (a, b) = futures::join!(client.send("first"), client.send("second"));
        assert_eq!(a.unwrap().session_id, b.unwrap().session_id);
        assert_eq!(client.transcript().len(), 4);
    }

    #[tokio::test]
    async fn test_buffered_reply_fallbacks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/proxy/chat"))
            .and(body_json(serde_json::json!({"message_payload": {"content": "a"}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"message": "from message 🎉"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/proxy/chat"))
            .and(body_json(serde_json::json!({"message_payload": {"content": "b"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = ChatClient::builder(server.uri())
            .navigation(Arc::new(MemoryNavigation::new(ExternalSessionState::session(
                "s0",
            ))))
            .build()
            .unwrap();

        assert_eq!(client.send("a").await.unwrap().content, "from message ");
        assert_eq!(client.send("b").await.unwrap().content, NO_RESPONSE);
    }

    #[tokio::test]
    async fn test_failure_replaces_reply_with_apology() {
        let server = MockServer::start().await;
        mount_session_create(&server, "s1", 1).await;
        Mock::given(method("POST"))
            .and(path("/proxy/chat"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(serde_json::json!({"error": "boom"})),
            )
            .mount(&server)
            .await;

        let client = ChatClient::builder(server.uri()).build().unwrap();
        let err = client.send("hi").await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR));

        let transcript = client.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].content, APOLOGY_TEXT);
        assert!(!transcript[1].streaming);
    }

    #[tokio::test]
    async fn test_new_chat_instance_survives_first_reply() {
        let server = MockServer::start().await;
        mount_session_create(&server, "s7", 1).await;
        Mock::given(method("POST"))
            .and(path("/proxy/chat"))
            .respond_with(sse(200, "s7", "data: welcome\n\n"))
            .mount(&server)
            .await;

        let created = Arc::new(Mutex::new(Vec::new()));
        let seen = created.clone();
        let client = ChatClient::builder(server.uri())
            .navigation(Arc::new(MemoryNavigation::new(ExternalSessionState::new_chat())))
            .on_session_created(move |id| seen.lock().unwrap().push(id.clone()))
            .build()
            .unwrap();
        let key = client.chat_key();
        assert!(matches!(key, ChatKey::Instance(_)));

        client.send("hello").await.unwrap();

        assert_eq!(client.chat_key(), key);
        assert_eq!(client.transcript().len(), 2);
        assert_eq!(*created.lock().unwrap(), vec![SessionId::from("s7")]);
    }

    #[tokio::test]
    async fn test_open_session_loads_reconciled_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sessions/s1/transcript"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": "s1",
                "messages": [
                    {"id": "m2", "role": "assistant", "content": "hello", "seq": 2},
                    {"id": "m1", "role": "user", "content": "hi", "seq": 1}
                ]
            })))
            .mount(&server)
            .await;

        let client = ChatClient::builder(server.uri()).build().unwrap();
        let messages = client.open_session(&SessionId::from("s1")).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(
            client.coordinator().active_session_id(),
            Some(SessionId::from("s1"))
        );
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessions": [{"session_id": "s1", "started_at": "2024-01-01T00:00:00Z"}]
            })))
            .mount(&server)
            .await;

        let client = ChatClient::builder(server.uri()).build().unwrap();
        let sessions = client.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id.as_str(), "s1");
    }

    #[tokio::test]
    async fn test_switch_during_creation_abandons_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"session_id": "s1"}))
                    .set_delay(std::time::Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/proxy/chat"))
            .respond_with(sse(200, "s1", "data: late\n\n"))
            .expect(0)
            .mount(&server)
            .await;

        let client = ChatClient::builder(server.uri()).build().unwrap();
        let switch = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            client
                .coordinator()
                .observe_external_session_change(Some(SessionId::from("other")), false)
        };
        let (result, outcome) = tokio::join!(client.send("hi"), switch);

        assert_eq!(outcome, Reconciliation::Switched);
        match result {
            Err(ClientError::Superseded { session_id }) => {
                assert_eq!(session_id, SessionId::from("s1"))
            }
            other => panic!("expected a superseded send, got {other:?}"),
        }
        let posted: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(posted, vec!["/sessions"]);
        assert_eq!(
            client.coordinator().active_session_id(),
            Some(SessionId::from("other"))
        );
        assert!(client.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_chat_is_posted_under_the_resolved_session() {
        let server = MockServer::start().await;
        mount_session_create(&server, "s1", 1).await;
        Mock::given(method("POST"))
            .and(path("/proxy/chat"))
            .respond_with(sse(200, "s1", "data: ok\n\n"))
            .mount(&server)
            .await;

        let client = ChatClient::builder(server.uri())
            .navigation(Arc::new(MemoryNavigation::new(ExternalSessionState::new_chat())))
            .build()
            .unwrap();
        client.send("hi").await.unwrap();

        let chat = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.url.path() == "/proxy/chat")
            .unwrap();
        assert_eq!(chat.url.query(), Some("session_id=s1"));
    }
}
