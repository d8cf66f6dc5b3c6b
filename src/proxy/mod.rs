//! Chat Proxy Handler building blocks
//!
//! The axum handlers live in `api::chat_handlers`; this module holds what
//! they are made of:
//! - [`payload`]: query/body alias resolution and message-shape normalization
//! - [`phase`]: the per-request `Idle → … → Done | Failed` state machine
//! - [`relay`]: streaming and buffered response construction

pub mod payload;
pub mod phase;
pub mod relay;

pub use payload::{ChatQuery, ChatRequest, InboundMessage, PayloadError};
pub use phase::{PhaseTracker, ProxyPhase};
pub use relay::{json_response, relay_stream, stream_response, SESSION_ID_HEADER};
