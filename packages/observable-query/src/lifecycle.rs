//! Lifecycle states and the legal transitions between them.
//!
//! ```text
//!                 fetch                    concrete result
//! Unexecuted ──────────────► Pending ─────────────────────► Completed
//!     │                         │                              │
//!     │ fetch (side effects)    │                              │ fetch
//!     ▼                         ▼                              ▼
//! SideEffectsPending ── close ──► SideEffectsBlocking ──► Completed ──► Closed
//!     │
//!     └── callbacks settled ──► Completed
//!
//! any ── start_polling ──► Polling ── stop_polling ──► PollingStopped
//! any ── close ──► Closed (terminal)
//! ```
//!
//! Two derived predicates gate behavior elsewhere:
//! - [`Lifecycle::is_refetch_safe`] decides whether `refetch()` may run
//! - [`Lifecycle::is_rebroadcast_safe`] decides whether externally pushed
//!   results may be replayed into the stream

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The phase an operation is in. Exactly one is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    /// No fetch issued yet.
    Unexecuted,
    /// Fetch in flight, no side effects waiting.
    Pending,
    /// Periodic re-fetch active.
    Polling,
    /// Polling was active and has been stopped.
    PollingStopped,
    /// Fetch in flight with side-effect callbacks registered.
    SideEffectsPending,
    /// Close requested while side effects were pending; close is deferred.
    SideEffectsBlocking,
    /// Most recent fetch resolved, nothing outstanding.
    Completed,
    /// Terminal. All resources released.
    Closed,
}

impl Lifecycle {
    /// Every state, in declaration order.
    pub const ALL: [Lifecycle; 8] = [
        Lifecycle::Unexecuted,
        Lifecycle::Pending,
        Lifecycle::Polling,
        Lifecycle::PollingStopped,
        Lifecycle::SideEffectsPending,
        Lifecycle::SideEffectsBlocking,
        Lifecycle::Completed,
        Lifecycle::Closed,
    ];

    /// Canonical camelCase spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Unexecuted => "unexecuted",
            Lifecycle::Pending => "pending",
            Lifecycle::Polling => "polling",
            Lifecycle::PollingStopped => "pollingStopped",
            Lifecycle::SideEffectsPending => "sideEffectsPending",
            Lifecycle::SideEffectsBlocking => "sideEffectsBlocking",
            Lifecycle::Completed => "completed",
            Lifecycle::Closed => "closed",
        }
    }

    /// Whether `refetch()` is permitted.
    pub fn is_refetch_safe(&self) -> bool {
        matches!(
            self,
            Lifecycle::Completed | Lifecycle::Polling | Lifecycle::PollingStopped
        )
    }

    /// Whether a late-arriving, externally produced result may be replayed
    /// into the operation's stream.
    pub fn is_rebroadcast_safe(&self) -> bool {
        matches!(
            self,
            Lifecycle::Pending
                | Lifecycle::SideEffectsPending
                | Lifecycle::Completed
                | Lifecycle::Polling
                | Lifecycle::PollingStopped
        )
    }

    /// Whether starting a fetch moves the lifecycle (to `Pending` or
    /// `SideEffectsPending`).
    pub fn has_fetch_edge(&self) -> bool {
        matches!(
            self,
            Lifecycle::Unexecuted | Lifecycle::Completed | Lifecycle::PollingStopped
        )
    }

    /// Whether no transition can leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Lifecycle::Closed)
    }

    /// Whether `self -> next` is one of the enumerated edges.
    ///
    /// Staying in the same state is not an edge; callers treat it as a no-op.
    pub fn can_transition_to(&self, next: Lifecycle) -> bool {
        use Lifecycle::*;

        match (*self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (_, Polling) => true,
            (Unexecuted | Completed | PollingStopped, Pending | SideEffectsPending) => true,
            (Pending, Completed) => true,
            (Polling, PollingStopped) => true,
            (SideEffectsPending, SideEffectsBlocking | Completed) => true,
            (SideEffectsBlocking, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a lifecycle name that is not canonical.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown lifecycle state '{0}'")]
pub struct ParseLifecycleError(String);

impl FromStr for Lifecycle {
    type Err = ParseLifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Lifecycle::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseLifecycleError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Lifecycle::*;

    #[test]
    fn test_refetch_safety_truth_table() {
        let safe: Vec<_> = Lifecycle::ALL
            .into_iter()
            .filter(Lifecycle::is_refetch_safe)
            .collect();
        assert_eq!(safe, vec![Polling, PollingStopped, Completed]);
    }

    #[test]
    fn test_rebroadcast_safety_truth_table() {
        for state in [Pending, SideEffectsPending, Completed, Polling, PollingStopped] {
            assert!(state.is_rebroadcast_safe(), "{state} should be rebroadcast safe");
        }
        for state in [Unexecuted, Closed, SideEffectsBlocking] {
            assert!(!state.is_rebroadcast_safe(), "{state} should not be rebroadcast safe");
        }
    }

    #[test]
    fn test_closed_is_terminal() {
        for next in Lifecycle::ALL {
            assert!(!Closed.can_transition_to(next));
        }
        assert!(Closed.is_terminal());
    }

    #[test]
    fn test_every_open_state_can_close_and_poll() {
        for state in Lifecycle::ALL.into_iter().filter(|s| *s != Closed) {
            assert!(state.can_transition_to(Closed));
            assert!(state.can_transition_to(Polling));
        }
    }

    #[test]
    fn test_fetch_edges() {
        for state in [Unexecuted, Completed, PollingStopped] {
            assert!(state.has_fetch_edge());
            assert!(state.can_transition_to(Pending));
            assert!(state.can_transition_to(SideEffectsPending));
        }
        for state in [Pending, Polling, SideEffectsPending, SideEffectsBlocking] {
            assert!(!state.has_fetch_edge());
        }
        assert!(!Polling.can_transition_to(Pending));
    }

    #[test]
    fn test_side_effect_edges() {
        assert!(SideEffectsPending.can_transition_to(SideEffectsBlocking));
        assert!(SideEffectsPending.can_transition_to(Completed));
        assert!(SideEffectsBlocking.can_transition_to(Completed));
        assert!(!SideEffectsBlocking.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(SideEffectsBlocking));
        assert!(!Unexecuted.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(PollingStopped));
    }

    #[test]
    fn test_parse_canonical_names_only() {
        for state in Lifecycle::ALL {
            assert_eq!(state.as_str().parse::<Lifecycle>(), Ok(state));
        }
        assert!("side_effects_pending".parse::<Lifecycle>().is_err());
        assert!("Pending".parse::<Lifecycle>().is_err());
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let json = serde_json::to_string(&SideEffectsBlocking).unwrap();
        assert_eq!(json, "\"sideEffectsBlocking\"");
        let back: Lifecycle = serde_json::from_str("\"pollingStopped\"").unwrap();
        assert_eq!(back, PollingStopped);
    }
}
