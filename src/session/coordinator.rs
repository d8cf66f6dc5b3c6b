//! Session Identity Manager
//!
//! Owns the active session id of one conversation view. Concurrent callers of
//! [`SessionCoordinator::ensure_session_id`] are consolidated onto a single
//! shared creation future; the handle is cleared when that future settles so
//! a later call can retry after a failure.
//!
//! Out-of-band changes (another conversation picked, explicit new chat) come
//! in through [`SessionCoordinator::observe_external_session_change`]. Each
//! reset bumps an epoch; a creation that settles under an older epoch hands
//! its id to its own waiters but is not adopted.

use super::navigation::{MemoryNavigation, Navigation};
use super::types::{
    ChatKey, ExternalSessionState, NewChatInstance, Reconciliation, Session, SessionError,
    SessionId, SessionSnapshot,
};
use crate::backend::{BackendError, ForwardContext, SessionCreator};
use crate::transcript::{Message, Transcript};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

/// Path of the coordinator's chat endpoint
pub const CHAT_PATH: &str = "/proxy/chat";

type CreationFuture = Shared<BoxFuture<'static, Result<SessionId, SessionError>>>;

/// Chat endpoint URL (path + query) addressing `session_id`
pub fn chat_endpoint_for(session_id: &SessionId) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("session_id", session_id.as_str())
        .finish();
    format!("{}?{}", CHAT_PATH, query)
}

/// Called once per instance key when a created session is reported upstream
pub type SessionCallback = Arc<dyn Fn(&SessionId) + Send + Sync>;

struct InFlight {
    ticket: u64,
    future: CreationFuture,
}

struct CoordinatorState {
    active: Option<Session>,
    chat_key: ChatKey,
    new_chat_mode: bool,
    /// Set while the view shows a not-yet-persisted new chat
    new_chat_instance: Option<NewChatInstance>,
    reported: bool,
    previous_session_id: Option<SessionId>,
    previous_is_new_chat: bool,
    creating: Option<InFlight>,
    next_ticket: u64,
    epoch: u64,
}

impl CoordinatorState {
    fn from_external(initial: ExternalSessionState) -> Self {
        let ExternalSessionState {
            session_id,
            new_chat,
        } = initial;
        let session_id = session_id.filter(|id| !id.is_empty());

        let new_chat_instance = (new_chat && session_id.is_none()).then(NewChatInstance::new);
        let chat_key = match (&session_id, &new_chat_instance) {
            (Some(id), _) => ChatKey::Session(id.clone()),
            (None, Some(instance)) => ChatKey::Instance(instance.clone()),
            (None, None) => ChatKey::Default,
        };

        Self {
            active: session_id.clone().map(Session::explicit),
            chat_key,
            new_chat_mode: new_chat_instance.is_some(),
            new_chat_instance,
            reported: session_id.is_some(),
            previous_session_id: session_id,
            previous_is_new_chat: new_chat,
            creating: None,
            next_ticket: 0,
            epoch: 0,
        }
    }

    /// Abandon the pending creation. Messages are cleared by the caller
    /// once the state lock is released.
    fn reset(&mut self) {
        self.creating = None;
        self.epoch += 1;
    }
}

struct Inner {
    creator: Arc<dyn SessionCreator>,
    navigation: Arc<dyn Navigation>,
    context: ForwardContext,
    on_created: Option<SessionCallback>,
    state: Mutex<CoordinatorState>,
    /// Separate from `state`; never locked while `state` is held
    transcript: Mutex<Transcript>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transcript(&self) -> MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_session_created(&self, id: &SessionId) -> bool {
        {
            let mut state = self.lock();
            if state.reported {
                return false;
            }
            state.reported = true;
        }
        self.announce(id);
        true
    }

    fn announce(&self, id: &SessionId) {
        self.navigation.replace_session(id);
        if let Some(callback) = &self.on_created {
            callback(id);
        }
    }

    /// Record the outcome of creation `ticket`, started under `epoch`.
    ///
    /// Returns the id to announce, if any.
    fn settle(
        &self,
        ticket: u64,
        epoch: u64,
        outcome: &Result<SessionId, BackendError>,
    ) -> Option<SessionId> {
        let mut state = self.lock();
        if state.creating.as_ref().map(|c| c.ticket) == Some(ticket) {
            state.creating = None;
        }

        let id = match outcome {
            Ok(id) => id,
            Err(err) => {
                warn!(ticket, error = %err, "Session creation failed");
                return None;
            }
        };

        if state.epoch != epoch || state.active.is_some() {
            debug!(ticket, session_id = %id, "Created session superseded, not adopting");
            return None;
        }

        info!(session_id = %id, "Session created");
        state.active = Some(Session::derived(id.clone()));
        state.new_chat_mode = false;
        if state.reported {
            return None;
        }
        state.reported = true;
        Some(id.clone())
    }
}

/// Builder for [`SessionCoordinator`]
pub struct CoordinatorBuilder {
    creator: Arc<dyn SessionCreator>,
    navigation: Option<Arc<dyn Navigation>>,
    initial: Option<ExternalSessionState>,
    context: ForwardContext,
    on_created: Option<SessionCallback>,
}

impl CoordinatorBuilder {
    /// External state to read from and mirror created sessions into
    pub fn navigation(mut self, navigation: Arc<dyn Navigation>) -> Self {
        self.navigation = Some(navigation);
        self
    }

    /// Start state; defaults to the navigation's current state
    pub fn initial(mut self, initial: ExternalSessionState) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Context (cookie, cancellation) for creation calls
    pub fn context(mut self, context: ForwardContext) -> Self {
        self.context = context;
        self
    }

    pub fn on_session_created(mut self, callback: impl Fn(&SessionId) + Send + Sync + 'static) -> Self {
        self.on_created = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> SessionCoordinator {
        let navigation = self
            .navigation
            .unwrap_or_else(|| Arc::new(MemoryNavigation::default()));
        let initial = self.initial.unwrap_or_else(|| navigation.current());

        SessionCoordinator {
            inner: Arc::new(Inner {
                creator: self.creator,
                navigation,
                context: self.context,
                on_created: self.on_created,
                state: Mutex::new(CoordinatorState::from_external(initial)),
                transcript: Mutex::new(Transcript::new()),
            }),
        }
    }
}

/// Session identity of one conversation view. Cheap to clone.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn builder(creator: Arc<dyn SessionCreator>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            creator,
            navigation: None,
            initial: None,
            context: ForwardContext::default(),
            on_created: None,
        }
    }

    /// Coordinator reading its start state from `navigation`
    pub fn new(creator: Arc<dyn SessionCreator>, navigation: Arc<dyn Navigation>) -> Self {
        Self::builder(creator).navigation(navigation).build()
    }

    /// Return the active session id, creating one if there is none.
    ///
    /// Callers arriving while a creation is in flight await that same
    /// request. Its result, success or failure, is shared by all of them.
    pub async fn ensure_session_id(&self) -> Result<SessionId, SessionError> {
        let future = {
            let mut state = self.inner.lock();
            if let Some(session) = &state.active {
                return Ok(session.id.clone());
            }

            match &state.creating {
                Some(in_flight) => {
                    debug!(ticket = in_flight.ticket, "Joining in-flight session creation");
                    in_flight.future.clone()
                }
                None => {
                    let ticket = state.next_ticket;
                    state.next_ticket += 1;
                    let future = self.creation(ticket, state.epoch);
                    state.creating = Some(InFlight {
                        ticket,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }

    fn creation(&self, ticket: u64, epoch: u64) -> CreationFuture {
        let creator = Arc::clone(&self.inner.creator);
        let context = self.inner.context.clone();
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);

        async move {
            debug!(ticket, "Requesting new session");
            let outcome = match creator.create_session(&context).await {
                Ok(created) if created.session_id.is_empty() => Err(BackendError::InvalidResponse(
                    "session creation did not return a session_id".into(),
                )),
                Ok(created) => Ok(created.session_id),
                Err(err) => Err(err),
            };

            if let Some(inner) = inner.upgrade() {
                if let Some(id) = inner.settle(ticket, epoch, &outcome) {
                    inner.announce(&id);
                }
            }
            outcome.map_err(SessionError::from)
        }
        .boxed()
        .shared()
    }

    /// Reconcile an out-of-band change of the external session state.
    ///
    /// An explicit id for the conversation that was just created under a
    /// new-chat instance keeps the chat key (the first message stays on
    /// screen). Any other new id is a real switch and resets local message
    /// state. An explicit new-chat request mints a fresh instance and re-arms
    /// the report latch.
    pub fn observe_external_session_change(
        &self,
        incoming: Option<SessionId>,
        is_new_chat: bool,
    ) -> Reconciliation {
        let incoming = incoming.filter(|id| !id.is_empty());
        let outcome = self.reconcile_external(incoming, is_new_chat);
        if matches!(outcome, Reconciliation::Switched | Reconciliation::FreshChat) {
            self.inner.lock_transcript().clear();
        }
        outcome
    }

    fn reconcile_external(&self, incoming: Option<SessionId>, is_new_chat: bool) -> Reconciliation {
        let mut state = self.inner.lock();

        let session_changed = incoming != state.previous_session_id;
        let new_chat_flag_changed = is_new_chat != state.previous_is_new_chat;
        let from_new_chat_instance = state.new_chat_instance.is_some();

        let outcome = match &incoming {
            Some(id) if session_changed => {
                if from_new_chat_instance {
                    if state.active.is_none() {
                        state.active = Some(Session::explicit(id.clone()));
                    }
                    state.new_chat_mode = false;
                    state.new_chat_instance = None;
                    state.reported = true;
                    state.creating = None;
                    Reconciliation::Continued
                } else if state.active.as_ref().map(|s| &s.id) != Some(id) {
                    state.reset();
                    state.active = Some(Session::explicit(id.clone()));
                    state.new_chat_mode = false;
                    state.chat_key = ChatKey::Session(id.clone());
                    state.reported = true;
                    Reconciliation::Switched
                } else {
                    Reconciliation::Unchanged
                }
            }
            None if (session_changed || new_chat_flag_changed) && is_new_chat => {
                let instance = NewChatInstance::new();
                state.reset();
                state.active = None;
                state.new_chat_mode = true;
                state.chat_key = ChatKey::Instance(instance.clone());
                state.new_chat_instance = Some(instance);
                state.reported = false;
                Reconciliation::FreshChat
            }
            _ => Reconciliation::Unchanged,
        };

        state.previous_session_id = incoming;
        state.previous_is_new_chat = is_new_chat;
        debug!(outcome = ?outcome, chat_key = %state.chat_key, "Reconciled external session state");
        outcome
    }

    /// Re-read the navigation state and reconcile with it
    pub fn sync_with_navigation(&self) -> Reconciliation {
        let ExternalSessionState {
            session_id,
            new_chat,
        } = self.inner.navigation.current();
        self.observe_external_session_change(session_id, new_chat)
    }

    /// Report a created session upstream (navigation + callback).
    ///
    /// Fires at most once per instance key; returns whether it fired.
    pub fn notify_session_created(&self, id: &SessionId) -> bool {
        self.inner.notify_session_created(id)
    }

    /// Active session id, if resolved
    pub fn active_session_id(&self) -> Option<SessionId> {
        self.inner.lock().active.as_ref().map(|s| s.id.clone())
    }

    pub fn chat_key(&self) -> ChatKey {
        self.inner.lock().chat_key.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock();
        SessionSnapshot {
            session: state.active.clone(),
            chat_key: state.chat_key.clone(),
            new_chat_mode: state.new_chat_mode,
            pending: state.creating.is_some(),
            reported: state.reported,
        }
    }

    /// Chat endpoint URL (path + query) for the current state.
    ///
    /// `?session_id=<id>` when resolved, `?new_chat=true&new_chat_instance=<key>`
    /// in new-chat mode, bare path otherwise.
    pub fn chat_endpoint(&self) -> String {
        let state = self.inner.lock();
        if let Some(session) = &state.active {
            return chat_endpoint_for(&session.id);
        }

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if state.new_chat_mode {
            query.append_pair("new_chat", "true");
            if let Some(instance) = &state.new_chat_instance {
                query.append_pair("new_chat_instance", instance.as_str());
            }
        }

        let query = query.finish();
        if query.is_empty() {
            CHAT_PATH.to_string()
        } else {
            format!("{}?{}", CHAT_PATH, query)
        }
    }

    /// Mutate the conversation's transcript.
    ///
    /// `f` runs under the transcript lock only, so it may query the
    /// coordinator's session state, but must not re-enter the transcript
    /// (`with_transcript`, `transcript`, `load_transcript`, or a
    /// reconciliation that clears it).
    pub fn with_transcript<R>(&self, f: impl FnOnce(&mut Transcript) -> R) -> R {
        f(&mut self.inner.lock_transcript())
    }

    /// Copy of the current transcript
    pub fn transcript(&self) -> Vec<Message> {
        self.inner.lock_transcript().messages().to_vec()
    }

    /// Replace the transcript with a fetched log
    pub fn load_transcript(&self, messages: Vec<Message>) {
        self.inner.lock_transcript().replace(messages);
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}
