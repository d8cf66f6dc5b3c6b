//! Backend chat/session service collaborator
//!
//! Same layout as the other pluggable services (trait + impl + mock):
//! - `SessionCreator` / `ChatBackend` traits: async interface to the backend
//! - `HttpBackend`: real implementation over reqwest
//! - `MockBackend`: in-memory double with call recording and creation gating

pub mod client;
pub mod error;
pub mod mock;
pub mod traits;

pub use client::HttpBackend;
pub use error::BackendError;
pub use mock::{MockBackend, MockChatReply, StreamWatch};
pub use traits::{
    BackendReply, ByteStream, ChatBackend, ChatPayload, CreatedSession, ForwardContext,
    MessagePayload, PassthroughRequest, PassthroughResponse, ReplyKind, SessionCreator,
    SessionList, SessionLog, SessionSummary,
};
