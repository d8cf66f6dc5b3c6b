//! Transcript Reconciler
//!
//! Turns backend message logs into ordered, role-tagged transcripts:
//! - [`reconcile`] / [`reconcile_log`]: current schema, sorted by `seq`
//! - [`reconcile_paired`]: legacy logs of untagged, interleaved turns
//! - [`Transcript`]: the live buffer the UI appends streamed replies to

pub mod buffer;
pub mod reconcile;
pub mod types;

pub use buffer::{Transcript, APOLOGY_TEXT};
pub use reconcile::{reconcile, reconcile_log, reconcile_paired, to_raw_entries};
pub use types::{LogEntry, Message, ParsedTurn, RawEntry, Role};
