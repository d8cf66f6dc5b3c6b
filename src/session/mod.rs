//! Session Identity Manager
//!
//! Establishes and deduplicates the identity of a conversation across
//! concurrent sends and out-of-band navigation changes.

pub mod coordinator;
pub mod navigation;
pub mod types;

pub use coordinator::{
    chat_endpoint_for, CoordinatorBuilder, SessionCallback, SessionCoordinator, CHAT_PATH,
};
pub use navigation::{MemoryNavigation, Navigation, UrlNavigation};
pub use types::{
    ChatKey, ExternalSessionState, NewChatInstance, Provenance, Reconciliation, Session,
    SessionError, SessionId, SessionSnapshot,
};
