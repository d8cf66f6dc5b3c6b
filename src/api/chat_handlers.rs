//! Chat proxy handlers: message relay, CORS preflight and generic pass-through

use crate::api::handlers::{AppError, CoordinatorState};
use crate::backend::{ChatPayload, ForwardContext, PassthroughRequest};
use crate::proxy::{
    json_response, relay_stream, stream_response, ChatQuery, ChatRequest, PhaseTracker,
    ProxyPhase,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub(crate) fn cookie_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn log_backend_failure(err: &AppError) {
    match err {
        AppError::Upstream { status, body } => {
            warn!(status = %status, body = %body, "Backend reported failure")
        }
        AppError::BadGateway { detail, .. } => error!(detail = %detail, "Backend unreachable"),
        _ => {}
    }
}

// ============================================================================
// Chat relay
// ============================================================================

/// POST /proxy/chat - Send a message, creating the session if needed
///
/// Responds with the backend's event stream (sanitized) or its buffered JSON
/// reply. Either way `x-session-id` carries the session used.
pub async fn post_chat(
    State(state): State<CoordinatorState>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let mut phase = PhaseTracker::new();
    phase.advance(ProxyPhase::SessionResolving);

    let request = ChatRequest::parse(&query, &body)
        .map_err(|e| phase.fail(AppError::BadRequest(e.to_string())))?;
    if state.require_broker_id && request.broker_id.is_none() {
        return Err(phase.fail(AppError::BadRequest("broker_id is required".into())));
    }

    // Fires when this request is dropped, aborting any in-flight backend call
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let ctx = ForwardContext::new(cookie_of(&headers), cancel.clone());

    let session_id = match request.session_id {
        Some(id) => id,
        None => {
            let created = state.backend.create_session(&ctx).await.map_err(|e| {
                let err = AppError::from(e);
                log_backend_failure(&err);
                phase.fail(err)
            })?;
            info!(
                request_id = %phase.request_id(),
                session_id = %created.session_id,
                "Created session for chat request"
            );
            created.session_id
        }
    };

    phase.advance(ProxyPhase::Forwarding);
    let payload = ChatPayload::new(request.message.content(), session_id.clone(), request.broker_id);
    let reply = state.backend.send_chat(&payload, &ctx).await.map_err(|e| {
        let err = AppError::from(e);
        log_backend_failure(&err);
        phase.fail(err)
    })?;
    let status = reply.status;

    if reply.is_event_stream() {
        phase.advance(ProxyPhase::Streaming);
        let relay = relay_stream(reply.body, state.sanitizer.clone(), cancel, guard, phase);
        return Ok(stream_response(status, &session_id, Body::from_stream(relay)));
    }

    if !status.is_success() {
        let body = reply
            .into_bytes()
            .await
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let err = AppError::Upstream { status, body };
        log_backend_failure(&err);
        return Err(phase.fail(err));
    }

    phase.advance(ProxyPhase::Buffering);
    let bytes = reply
        .into_bytes()
        .await
        .map_err(|e| phase.fail(AppError::from(e)))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        phase.fail(AppError::BadGateway {
            detail: format!("backend chat reply is not JSON: {}", e),
            target: None,
        })
    })?;

    phase.advance(ProxyPhase::Done);
    Ok(json_response(status, &session_id, value))
}

/// OPTIONS /proxy/chat - CORS preflight acknowledgement
pub async fn chat_preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
        ],
    )
        .into_response()
}

// ============================================================================
// Generic pass-through
// ============================================================================

/// ANY /proxy/{*path} - Relay a request below the backend's pass-through prefix
pub async fn passthrough(
    State(state): State<CoordinatorState>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let target = state.backend.passthrough_target(&path, query.as_deref());
    let request = PassthroughRequest {
        method,
        path,
        query,
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let ctx = ForwardContext::new(cookie_of(&headers), cancel);

    let response = state
        .backend
        .passthrough(request, &ctx)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::BadGateway { detail, .. } => {
                error!(url = %target, detail = %detail, "Pass-through target unreachable");
                AppError::BadGateway {
                    detail,
                    target: Some(target.clone()),
                }
            }
            other => other,
        })?;

    let mut relayed = HeaderMap::new();
    for (name, value) in &response.headers {
        relayed.append(name.clone(), value.clone());
    }
    if !relayed.contains_key(header::CONTENT_TYPE) {
        relayed.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
    }

    Ok((response.status, relayed, Body::from(response.body)).into_response())
}
