//! Session handlers: creation, listing and transcript loading

use crate::api::chat_handlers::cookie_of;
use crate::api::handlers::{AppError, CoordinatorState};
use crate::backend::{CreatedSession, ForwardContext, SessionList};
use crate::session::SessionId;
use crate::transcript::{reconcile_log, Message};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Reconciled transcript of one session
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    /// `None` for the `new` pseudo-session
    pub session_id: Option<SessionId>,
    pub messages: Vec<Message>,
}

/// POST /sessions - Create a backend session for a UI-side coordinator
pub async fn create_session(
    State(state): State<CoordinatorState>,
    headers: HeaderMap,
) -> Result<Json<CreatedSession>, AppError> {
    let ctx = ForwardContext::new(cookie_of(&headers), Default::default());
    let created = state.backend.create_session(&ctx).await?;
    info!(session_id = %created.session_id, "Created session");
    Ok(Json(created))
}

/// GET /sessions - List the caller's sessions
///
/// A backend failure degrades to an empty list.
pub async fn list_sessions(
    State(state): State<CoordinatorState>,
    headers: HeaderMap,
) -> Json<SessionList> {
    let ctx = ForwardContext::new(cookie_of(&headers), Default::default());
    let sessions = match state.backend.list_sessions(&ctx).await {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(error = %e, "Failed to list sessions, returning none");
            Vec::new()
        }
    };
    Json(SessionList { sessions })
}

/// GET /sessions/{id}/transcript - Ordered, role-tagged history of a session
pub async fn get_transcript(
    State(state): State<CoordinatorState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TranscriptResponse>, AppError> {
    if session_id.trim().is_empty() || session_id.eq_ignore_ascii_case("new") {
        return Ok(Json(TranscriptResponse {
            session_id: None,
            messages: Vec::new(),
        }));
    }

    let session_id = SessionId::from(session_id);
    let ctx = ForwardContext::new(cookie_of(&headers), Default::default());
    let log = state
        .backend
        .get_session(&session_id, &ctx)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".into()))?;

    Ok(Json(TranscriptResponse {
        session_id: Some(log.session_id.unwrap_or(session_id)),
        messages: reconcile_log(log.messages),
    }))
}
