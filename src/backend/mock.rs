//! In-memory backend for tests
//!
//! Mints sequential session ids (`s1`, `s2`, …), records every call, and can
//! hold session creation in flight until the test releases it, which is how
//! the dedup and retry properties are exercised deterministically.

use super::traits::{
    BackendReply, ByteStream, ChatBackend, ChatPayload, CreatedSession, ForwardContext,
    PassthroughRequest, PassthroughResponse, ReplyKind, SessionCreator, SessionLog,
    SessionSummary,
};
use super::BackendError;
use crate::session::SessionId;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::Semaphore;

/// Canned answer for `send_chat`
#[derive(Debug, Clone)]
pub enum MockChatReply {
    /// `text/event-stream` body delivered in exactly these chunks
    Stream { status: StatusCode, chunks: Vec<Bytes> },
    /// Event stream that delivers `chunks` and then never ends
    Endless { chunks: Vec<Bytes> },
    /// Buffered JSON body
    Json { status: StatusCode, body: serde_json::Value },
    /// Buffered non-JSON body
    Text { status: StatusCode, body: String },
    /// Backend cannot be reached
    Unreachable,
}

impl Default for MockChatReply {
    fn default() -> Self {
        MockChatReply::Json {
            status: StatusCode::OK,
            body: serde_json::json!({"content": "ok"}),
        }
    }
}

/// Flags flipped when a mock body stream is dropped
#[derive(Debug, Clone, Default)]
pub struct StreamWatch {
    closed: Arc<AtomicBool>,
}

impl StreamWatch {
    /// True once the consumer dropped the upstream body
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Wraps a body stream and records when it is dropped.
struct WatchedStream {
    inner: ByteStream,
    watch: StreamWatch,
}

impl Stream for WatchedStream {
    type Item = Result<Bytes, BackendError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for WatchedStream {
    fn drop(&mut self) {
        self.watch.closed.store(true, Ordering::SeqCst);
    }
}

/// In-memory [`ChatBackend`].
#[derive(Default)]
pub struct MockBackend {
    next_id: AtomicUsize,
    create_calls: AtomicUsize,
    failures_pending: AtomicUsize,
    creation_gate: Mutex<Option<Arc<Semaphore>>>,
    chat_reply: Mutex<MockChatReply>,
    chat_calls: Mutex<Vec<(ChatPayload, Option<String>)>>,
    sessions: Mutex<HashMap<SessionId, SessionLog>>,
    summaries: Mutex<Vec<SessionSummary>>,
    list_fails: AtomicBool,
    passthrough_calls: Mutex<Vec<PassthroughRequest>>,
    watch: StreamWatch,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every chat request with `reply`.
    pub fn with_chat_reply(self, reply: MockChatReply) -> Self {
        *lock(&self.chat_reply) = reply;
        self
    }

    /// Seed a stored session log.
    pub fn with_session(self, session_id: &str, log: SessionLog) -> Self {
        lock(&self.sessions).insert(SessionId::from(session_id), log);
        self
    }

    /// Make `list_sessions` fail with a backend error.
    pub fn with_failing_session_list(self) -> Self {
        self.list_fails.store(true, Ordering::SeqCst);
        self
    }

    /// Set the summaries returned by `list_sessions`.
    pub fn with_summaries(self, summaries: Vec<SessionSummary>) -> Self {
        *lock(&self.summaries) = summaries;
        self
    }

    /// Hold every subsequent `create_session` until [`release_creations`](Self::release_creations).
    pub fn hold_creations(&self) {
        *lock(&self.creation_gate) = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held creations complete.
    pub fn release_creations(&self, n: usize) {
        if let Some(gate) = lock(&self.creation_gate).as_ref() {
            gate.add_permits(n);
        }
    }

    /// Fail the next `n` session creations with a 503.
    pub fn fail_next_creations(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Number of `create_session` calls received so far
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Chat payloads received so far, with the cookie each one carried
    pub fn chat_calls(&self) -> Vec<(ChatPayload, Option<String>)> {
        lock(&self.chat_calls).clone()
    }

    /// Pass-through requests received so far
    pub fn passthrough_calls(&self) -> Vec<PassthroughRequest> {
        lock(&self.passthrough_calls).clone()
    }

    /// Observes whether the last streamed chat body was dropped
    pub fn stream_watch(&self) -> StreamWatch {
        self.watch.clone()
    }

    fn watched(&self, body: ByteStream) -> ByteStream {
        self.watch.closed.store(false, Ordering::SeqCst);
        WatchedStream {
            inner: body,
            watch: self.watch.clone(),
        }
        .boxed()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn chunks_stream(chunks: Vec<Bytes>) -> ByteStream {
    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
}

fn unreachable_error() -> BackendError {
    BackendError::Transport("connection refused (mock)".into())
}

#[async_trait]
impl SessionCreator for MockBackend {
    async fn create_session(&self, ctx: &ForwardContext) -> Result<CreatedSession, BackendError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.creation_gate).clone();
        if let Some(gate) = gate {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(BackendError::Cancelled),
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }

        let fail = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(BackendError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "session store unavailable".into(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedSession {
            session_id: SessionId::from(format!("s{}", n)),
            started_at: None,
        })
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn send_chat(
        &self,
        payload: &ChatPayload,
        ctx: &ForwardContext,
    ) -> Result<BackendReply, BackendError> {
        lock(&self.chat_calls).push((payload.clone(), ctx.cookie.clone()));

        let reply = lock(&self.chat_reply).clone();
        match reply {
            MockChatReply::Stream { status, chunks } => Ok(BackendReply {
                status,
                kind: ReplyKind::EventStream,
                body: self.watched(chunks_stream(chunks)),
            }),
            MockChatReply::Endless { chunks } => Ok(BackendReply {
                status: StatusCode::OK,
                kind: ReplyKind::EventStream,
                body: self.watched(chunks_stream(chunks).chain(futures::stream::pending()).boxed()),
            }),
            MockChatReply::Json { status, body } => Ok(BackendReply {
                status,
                kind: ReplyKind::Complete,
                body: chunks_stream(vec![Bytes::from(body.to_string())]),
            }),
            MockChatReply::Text { status, body } => Ok(BackendReply {
                status,
                kind: ReplyKind::Complete,
                body: chunks_stream(vec![Bytes::from(body)]),
            }),
            MockChatReply::Unreachable => Err(unreachable_error()),
        }
    }

    async fn list_sessions(
        &self,
        _ctx: &ForwardContext,
    ) -> Result<Vec<SessionSummary>, BackendError> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".into(),
            });
        }
        Ok(lock(&self.summaries).clone())
    }

    async fn get_session(
        &self,
        session_id: &SessionId,
        _ctx: &ForwardContext,
    ) -> Result<Option<SessionLog>, BackendError> {
        Ok(lock(&self.sessions).get(session_id).cloned())
    }

    async fn passthrough(
        &self,
        request: PassthroughRequest,
        _ctx: &ForwardContext,
    ) -> Result<PassthroughResponse, BackendError> {
        let body = request.body.clone();
        lock(&self.passthrough_calls).push(request);

        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));
        Ok(PassthroughResponse {
            status: StatusCode::OK,
            headers,
            body,
        })
    }

    fn passthrough_target(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) => format!("mock://backend/{}?{}", path, q),
            None => format!("mock://backend/{}", path),
        }
    }
}
