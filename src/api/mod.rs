//! HTTP surface of the coordinator

pub mod chat_handlers;
pub mod handlers;
pub mod routes;
pub mod session_handlers;

pub use handlers::{AppError, CoordinatorState, ServerState};
pub use routes::create_router;
