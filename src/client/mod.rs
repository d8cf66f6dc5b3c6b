//! UI-side client of the coordinator
//!
//! [`ChatClient`] is what a conversation view (or `chatctl`) drives: it owns
//! a [`SessionCoordinator`](crate::session::SessionCoordinator) whose sessions
//! are created through the coordinator's own `POST /sessions`.

pub mod chat;
pub mod creator;

pub use chat::{ChatClient, ChatClientBuilder, ChatReply, ClientError};
pub use creator::ProxySessionCreator;
