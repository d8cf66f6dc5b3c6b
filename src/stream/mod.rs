//! Stream Sanitizing Transform
//!
//! - [`Utf8Carry`]: streaming UTF-8 decoder that holds back split characters
//! - [`Sanitizer`]: pure text filters ([`EmojiFilter`], [`Passthrough`], closures)
//! - [`SanitizingStream`]: applies a sanitizer to a relayed byte stream
//! - [`SseDataDecoder`]: extracts `data:` payloads on the consuming side

pub mod sanitize;
pub mod sanitizing;
pub mod sse;
pub mod utf8;

pub use sanitize::{strip_emojis, EmojiFilter, Passthrough, Sanitizer, SanitizerKind};
pub use sanitizing::SanitizingStream;
pub use sse::{SseDataDecoder, DONE_SENTINEL};
pub use utf8::Utf8Carry;
