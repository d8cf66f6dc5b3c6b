//! Shared API state, error type and health endpoint

use crate::backend::{BackendError, ChatBackend};
use crate::stream::Sanitizer;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Shared server state
pub struct ServerState {
    pub backend: Arc<dyn ChatBackend>,
    /// Applied to relayed event streams
    pub sanitizer: Arc<dyn Sanitizer>,
    /// Reject chat requests without a broker id
    pub require_broker_id: bool,
}

pub type CoordinatorState = Arc<ServerState>;

impl ServerState {
    pub fn new(backend: Arc<dyn ChatBackend>, sanitizer: Arc<dyn Sanitizer>) -> Self {
        Self {
            backend,
            sanitizer,
            require_broker_id: true,
        }
    }

    pub fn with_require_broker_id(mut self, required: bool) -> Self {
        self.require_broker_id = required;
        self
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness check. The backend is not contacted: it is an external collaborator.
pub async fn health(State(_state): State<CoordinatorState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    NotFound(String),
    BadRequest(String),
    /// Backend unreachable or unusable
    BadGateway {
        detail: String,
        target: Option<String>,
    },
    /// Backend answered non-2xx; relayed verbatim
    Upstream { status: StatusCode, body: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "internal error: {}", e),
            AppError::NotFound(msg) | AppError::BadRequest(msg) => f.write_str(msg),
            AppError::BadGateway { detail, .. } => write!(f, "backend connection failed: {}", detail),
            AppError::Upstream { status, body } => write!(f, "backend returned {}: {}", status, body),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            AppError::BadGateway { detail, target } => {
                let mut body = serde_json::json!({
                    "error": "Backend connection failed",
                    "detail": detail,
                });
                if let Some(target) = target {
                    body["target"] = serde_json::Value::String(target);
                }
                (StatusCode::BAD_GATEWAY, body)
            }
            AppError::Upstream { status, body } => {
                let message = if body.trim().is_empty() {
                    "Backend request failed".to_string()
                } else {
                    body
                };
                (status, serde_json::json!({ "error": message }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transport(source) => AppError::BadGateway {
                detail: source.to_string(),
                target: None,
            },
            BackendError::Status { status, body } => AppError::Upstream { status, body },
            BackendError::InvalidResponse(detail) => AppError::BadGateway {
                detail,
                target: None,
            },
            BackendError::Cancelled => {
                AppError::Internal(anyhow::anyhow!("backend call cancelled"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_upstream_status_and_body_relayed() {
        let err = AppError::from(BackendError::Status {
            status: StatusCode::UNAUTHORIZED,
            body: "token expired".into(),
        });
        let (status, body) = render(err).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "token expired");
    }

    #[tokio::test]
    async fn test_upstream_empty_body_gets_default_message() {
        let (status, body) = render(AppError::Upstream {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        })
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Backend request failed");
    }

    #[tokio::test]
    async fn test_transport_maps_to_bad_gateway() {
        let err = AppError::from(BackendError::Transport("connection refused".into()));
        let (status, body) = render(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Backend connection failed");
        assert_eq!(body["detail"], "connection refused");
        assert!(body.get("target").is_none());
    }

    #[tokio::test]
    async fn test_bad_request_shape() {
        let (status, body) = render(AppError::BadRequest("broker_id is required".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({"error": "broker_id is required"}));
    }
}
