//! Navigation collaborator
//!
//! The coordinator never touches a real router. It reads the external session
//! state and writes the resolved id back through [`Navigation`], so the URL
//! (or any other persisted state) can mirror the session for reloads and deep
//! links.

use super::types::{ExternalSessionState, SessionId};
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

/// Read and write the session state held outside the coordinator.
pub trait Navigation: Send + Sync {
    /// Current external state
    fn current(&self) -> ExternalSessionState;

    /// Record a freshly created session, replacing the current entry
    fn replace_session(&self, id: &SessionId);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Query parameter carrying the session id
pub const SESSION_PARAM: &str = "session";
/// Query parameter flagging an explicit new chat
pub const NEW_CHAT_PARAM: &str = "new";

/// Navigation backed by a page URL.
///
/// `?session=<id>` selects a conversation, `?new=true` (or `?session=new`)
/// requests a fresh chat. `replace_session` sets `session` and drops `new`,
/// like a router replace.
#[derive(Debug)]
pub struct UrlNavigation {
    url: Mutex<Url>,
}

impl UrlNavigation {
    pub fn new(url: Url) -> Self {
        Self {
            url: Mutex::new(url),
        }
    }

    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    /// Current URL
    pub fn url(&self) -> Url {
        lock(&self.url).clone()
    }

    /// Point the navigation at another URL (user clicked a link)
    pub fn navigate(&self, url: Url) {
        *lock(&self.url) = url;
    }

    fn state_of(url: &Url) -> ExternalSessionState {
        let mut session = None;
        let mut new_flag = false;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                SESSION_PARAM => session = Some(value.into_owned()),
                NEW_CHAT_PARAM => new_flag = matches!(value.as_ref(), "true" | "1"),
                _ => {}
            }
        }

        let explicit_new = session
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("new"));
        let session_id = session
            .filter(|_| !explicit_new)
            .and_then(SessionId::non_empty);
        let new_chat = session_id.is_none() && (new_flag || explicit_new);

        ExternalSessionState {
            session_id,
            new_chat,
        }
    }
}

impl Navigation for UrlNavigation {
    fn current(&self) -> ExternalSessionState {
        Self::state_of(&lock(&self.url))
    }

    fn replace_session(&self, id: &SessionId) {
        let mut url = lock(&self.url);
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != SESSION_PARAM && key != NEW_CHAT_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(SESSION_PARAM, id.as_str());
        drop(pairs);
        tracing::debug!(url = %url, "Mirrored session into URL");
    }
}

/// In-memory navigation, for headless callers and tests.
///
/// Records every `replace_session` call.
#[derive(Debug, Default)]
pub struct MemoryNavigation {
    state: Mutex<ExternalSessionState>,
    replaced: Mutex<Vec<SessionId>>,
}

impl MemoryNavigation {
    pub fn new(state: ExternalSessionState) -> Self {
        Self {
            state: Mutex::new(state),
            replaced: Mutex::default(),
        }
    }

    /// Change the external state out-of-band
    pub fn set(&self, state: ExternalSessionState) {
        *lock(&self.state) = state;
    }

    /// Every id written through `replace_session`, in order
    pub fn replaced(&self) -> Vec<SessionId> {
        lock(&self.replaced).clone()
    }
}

impl Navigation for MemoryNavigation {
    fn current(&self) -> ExternalSessionState {
        lock(&self.state).clone()
    }

    fn replace_session(&self, id: &SessionId) {
        lock(&self.replaced).push(id.clone());
        *lock(&self.state) = ExternalSessionState::session(id.clone());
    }
}
