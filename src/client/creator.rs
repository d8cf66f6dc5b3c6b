//! [`SessionCreator`] that asks a running coordinator for a session

use crate::backend::{BackendError, CreatedSession, ForwardContext, SessionCreator};
use async_trait::async_trait;
use reqwest::header;

/// Creates sessions through the coordinator's `POST /sessions`.
#[derive(Clone)]
pub struct ProxySessionCreator {
    client: reqwest::Client,
    base_url: String,
}

impl ProxySessionCreator {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}/sessions", self.base_url)
    }
}

#[async_trait]
impl SessionCreator for ProxySessionCreator {
    async fn create_session(&self, ctx: &ForwardContext) -> Result<CreatedSession, BackendError> {
        let mut request = self.client.post(self.sessions_url());
        if let Some(cookie) = ctx.cookie.as_deref().filter(|c| !c.is_empty()) {
            request = request.header(header::COOKIE, cookie);
        }

        let call = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Status { status, body });
            }
            response.json::<CreatedSession>().await.map_err(|e| {
                BackendError::InvalidResponse(format!("session create payload: {}", e))
            })
        };

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(BackendError::Cancelled),
            result = call => result,
        }
    }
}
