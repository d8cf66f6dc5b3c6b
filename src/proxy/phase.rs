//! Per-request state machine of the chat proxy
//!
//! ```text
//! Idle → SessionResolving → Forwarding → Streaming → Done
//!                 │              │    └→ Buffering → Done
//!                 └──────────────┴──────────┴──→ Failed
//! ```

use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyPhase {
    Idle,
    SessionResolving,
    Forwarding,
    Streaming,
    Buffering,
    Done,
    Failed,
}

impl ProxyPhase {
    pub fn can_transition_to(self, next: ProxyPhase) -> bool {
        use ProxyPhase::*;
        matches!(
            (self, next),
            (Idle, SessionResolving)
                | (SessionResolving, Forwarding)
                | (SessionResolving, Failed)
                | (Forwarding, Streaming)
                | (Forwarding, Buffering)
                | (Forwarding, Failed)
                | (Streaming, Done)
                | (Buffering, Done)
                | (Buffering, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProxyPhase::Done | ProxyPhase::Failed)
    }
}

impl fmt::Display for ProxyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks and logs the phase of one proxied request.
///
/// Dropped before reaching a terminal phase means the caller went away.
#[derive(Debug)]
pub struct PhaseTracker {
    request_id: Uuid,
    phase: ProxyPhase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            phase: ProxyPhase::Idle,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn phase(&self) -> ProxyPhase {
        self.phase
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: ProxyPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            warn!(
                request_id = %self.request_id,
                from = %self.phase,
                to = %next,
                "Illegal proxy phase transition"
            );
            return false;
        }
        debug!(request_id = %self.request_id, from = %self.phase, to = %next, "Proxy phase");
        self.phase = next;
        true
    }

    /// Enter `Failed`, logging `reason`, and hand the error back
    pub fn fail<E: fmt::Display>(&mut self, reason: E) -> E {
        debug!(request_id = %self.request_id, reason = %reason, "Proxy request failed");
        self.advance(ProxyPhase::Failed);
        reason
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PhaseTracker {
    fn drop(&mut self) {
        if !self.phase.is_terminal() {
            debug!(
                request_id = %self.request_id,
                phase = %self.phase,
                "Proxy request abandoned by caller"
            );
        }
    }
}
