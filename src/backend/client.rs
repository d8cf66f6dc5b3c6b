//! HTTP backend client
//!
//! Talks to the backend chat/session service over HTTP:
//! - `POST {url}{api_prefix}/session` → `{session_id}`
//! - `GET  {url}{api_prefix}/session` → `{sessions: [...]}`
//! - `GET  {url}{api_prefix}/session/{id}` → `{messages: [...]}`
//! - `POST {url}{api_prefix}/chat` → `text/event-stream` or JSON
//! - `*    {url}{passthrough_prefix}/{path}` for the generic proxy

use super::traits::{
    BackendReply, ChatBackend, ChatPayload, CreatedSession, ForwardContext, PassthroughRequest,
    PassthroughResponse, ReplyKind, SessionCreator, SessionList, SessionLog, SessionSummary,
};
use super::BackendError;
use crate::session::SessionId;
use anyhow::Context;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{self, HeaderMap};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Hop-by-hop and framing headers never relayed by the pass-through proxy
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// reqwest-based [`ChatBackend`].
///
/// Cheaply cloneable (shares the reqwest client internally).
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_prefix: String,
    passthrough_prefix: String,
}

impl HttpBackend {
    /// Build a client for the backend at `base_url`.
    ///
    /// No overall request timeout is set: a streamed reply may legitimately
    /// stay open for minutes. `connect_timeout` bounds connection setup only.
    pub fn new(
        base_url: &str,
        api_prefix: &str,
        passthrough_prefix: &str,
        connect_timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().context("Failed to build backend HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_prefix: normalize_prefix(api_prefix),
            passthrough_prefix: normalize_prefix(passthrough_prefix),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}/{}", self.base_url, self.api_prefix, path)
    }

    /// `{api_prefix}/session/{id}` with the id percent-encoded as one path segment
    fn session_url(&self, session_id: &SessionId) -> String {
        let base = self.endpoint("session");
        match url::Url::parse(&base) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.push(session_id.as_str());
                }
                url.to_string()
            }
            Err(_) => format!("{}/{}", base, session_id),
        }
    }

    fn with_cookie(builder: RequestBuilder, ctx: &ForwardContext) -> RequestBuilder {
        match ctx.cookie.as_deref() {
            Some(cookie) if !cookie.is_empty() => builder.header(header::COOKIE, cookie),
            _ => builder,
        }
    }

    /// Send a request, aborting as soon as the caller's token fires.
    async fn send(
        &self,
        builder: RequestBuilder,
        ctx: &ForwardContext,
    ) -> Result<Response, BackendError> {
        let builder = Self::with_cookie(builder, ctx);
        cancellable(ctx, async { builder.send().await.map_err(BackendError::from) }).await
    }

    /// Turn a non-2xx response into [`BackendError::Status`].
    async fn ensure_success(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or_default().to_string());
        Err(BackendError::Status { status, body })
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

async fn cancellable<T>(
    ctx: &ForwardContext,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(BackendError::Cancelled),
        result = call => result,
    }
}

#[async_trait]
impl SessionCreator for HttpBackend {
    async fn create_session(&self, ctx: &ForwardContext) -> Result<CreatedSession, BackendError> {
        let request = self
            .client
            .post(self.endpoint("session"))
            .header(header::CONTENT_TYPE, "application/json");
        let response = Self::ensure_success(self.send(request, ctx).await?).await?;

        let created: CreatedSession = cancellable(ctx, async {
            response.json().await.map_err(|e| {
                BackendError::InvalidResponse(format!("session create payload: {}", e))
            })
        })
        .await?;

        if created.session_id.is_empty() {
            return Err(BackendError::InvalidResponse(
                "session creation did not return a session_id".into(),
            ));
        }
        Ok(created)
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send_chat(
        &self,
        payload: &ChatPayload,
        ctx: &ForwardContext,
    ) -> Result<BackendReply, BackendError> {
        let request = self.client.post(self.endpoint("chat")).json(payload);
        let response = self.send(request, ctx).await?;

        let status = response.status();
        let kind = if is_event_stream(response.headers()) {
            ReplyKind::EventStream
        } else {
            ReplyKind::Complete
        };
        debug!(status = %status, kind = ?kind, "Backend chat reply headers received");

        // Dropping this stream drops the reqwest body, which closes the connection.
        let body = response.bytes_stream().map_err(BackendError::from).boxed();

        Ok(BackendReply { status, kind, body })
    }

    async fn list_sessions(
        &self,
        ctx: &ForwardContext,
    ) -> Result<Vec<SessionSummary>, BackendError> {
        let request = self.client.get(self.endpoint("session"));
        let response = Self::ensure_success(self.send(request, ctx).await?).await?;
        let list: SessionList = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("session list payload: {}", e)))?;
        Ok(list.sessions)
    }

    async fn get_session(
        &self,
        session_id: &SessionId,
        ctx: &ForwardContext,
    ) -> Result<Option<SessionLog>, BackendError> {
        let url = self.session_url(session_id);
        let response = self.send(self.client.get(url), ctx).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(response).await?;
        let log: SessionLog = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("session log payload: {}", e)))?;
        Ok(Some(log))
    }

    async fn passthrough(
        &self,
        request: PassthroughRequest,
        ctx: &ForwardContext,
    ) -> Result<PassthroughResponse, BackendError> {
        let url = self.passthrough_target(&request.path, request.query.as_deref());
        let carries_body = matches!(request.method.as_str(), "POST" | "PUT" | "PATCH");

        let mut builder = self.client.request(request.method, url);
        if let Some(content_type) = request.content_type.as_deref() {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        if carries_body && !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = self.send(builder, ctx).await?;
        let status = response.status();

        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        let body = cancellable(ctx, async {
            response.bytes().await.map_err(BackendError::from)
        })
        .await?;

        Ok(PassthroughResponse {
            status,
            headers,
            body,
        })
    }

    fn passthrough_target(&self, path: &str, query: Option<&str>) -> String {
        let mut target = format!(
            "{}{}/{}",
            self.base_url,
            self.passthrough_prefix,
            path.trim_start_matches('/')
        );
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(q);
        }
        target
    }
}
