//! Building relayed responses

use super::phase::{PhaseTracker, ProxyPhase};
use crate::backend::ByteStream;
use crate::session::SessionId;
use crate::stream::{SanitizingStream, Sanitizer};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::task::Poll;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Response header echoing the session the message was sent under
pub const SESSION_ID_HEADER: &str = "x-session-id";

const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

/// Relay a backend event stream through the sanitizer.
///
/// The stream owns the request's drop guard: when the caller goes away and
/// the body is dropped, the token fires and the backend body is dropped with
/// it. The tracker reaches `Done` when the stream ends.
pub fn relay_stream(
    upstream: ByteStream,
    sanitizer: Arc<dyn Sanitizer>,
    cancel: CancellationToken,
    guard: DropGuard,
    tracker: PhaseTracker,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let mut tracker = tracker;
    let completion = futures::stream::poll_fn(move |_| {
        if !tracker.phase().is_terminal() {
            tracker.advance(ProxyPhase::Done);
        }
        Poll::<Option<Result<Bytes, Infallible>>>::Ready(None)
    });

    SanitizingStream::new(upstream, sanitizer)
        .with_cancellation(cancel)
        .with_drop_guard(guard)
        .chain(completion)
}

fn session_headers(session_id: &SessionId) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(session_id.as_str()) {
        headers.insert(SESSION_ID_HEADER, value);
    }
    headers
}

/// Streaming response with the backend's status and no-buffering hints
pub fn stream_response(status: StatusCode, session_id: &SessionId, body: Body) -> Response {
    let mut headers = session_headers(session_id);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    (status, headers, body).into_response()
}

/// Buffered JSON response
pub fn json_response(status: StatusCode, session_id: &SessionId, value: serde_json::Value) -> Response {
    (status, session_headers(session_id), Json(value)).into_response()
}
