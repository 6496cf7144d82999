//! Last-started-wins gate for overlapping probes
//!
//! Every probe gets a monotonically increasing token when it starts. A
//! finished probe's report is applied only if its token is still the latest
//! one issued; anything older is discarded, whatever order the probes finish
//! in. Issuing a new ticket also cancels the previous in-flight probe so it
//! stops early.

use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::ServerCapabilities;

/// Identifies one probe request. Later requests compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProbeToken(u64);

impl ProbeToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Issued to a probe when it starts
#[derive(Debug, Clone)]
pub struct ProbeTicket {
    token: ProbeToken,
    cancel: CancellationToken,
}

impl ProbeTicket {
    pub fn token(&self) -> ProbeToken {
        self.token
    }

    /// Fires when a newer ticket supersedes this one
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[derive(Debug, Default)]
struct GateState {
    latest: u64,
    in_flight: Option<CancellationToken>,
    applied: Option<(ProbeToken, ServerCapabilities)>,
}

/// Shared between the code that starts probes and the code that applies
/// their results. Wrap in an `Arc` to share across tasks.
#[derive(Debug, Default)]
pub struct ProbeGate {
    state: Mutex<GateState>,
}

impl ProbeGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new probe request, superseding any in flight
    pub fn issue(&self) -> ProbeTicket {
        let mut state = self.state();
        state.latest += 1;

        if let Some(previous) = state.in_flight.take() {
            log::debug!(
                "ProbeGate: token {} supersedes token {}",
                state.latest,
                state.latest - 1
            );
            previous.cancel();
        }

        let cancel = CancellationToken::new();
        state.in_flight = Some(cancel.clone());

        ProbeTicket {
            token: ProbeToken(state.latest),
            cancel,
        }
    }

    /// Whether `token` is still the latest issued
    pub fn is_current(&self, token: ProbeToken) -> bool {
        self.state().latest == token.0
    }

    /// Apply a finished probe's report. Returns false, discarding the report,
    /// when a newer probe has been issued since.
    pub fn apply(&self, token: ProbeToken, capabilities: ServerCapabilities) -> bool {
        let mut state = self.state();
        if state.latest != token.0 {
            log::debug!(
                "ProbeGate: discarding stale result for token {} (latest is {})",
                token.0,
                state.latest
            );
            return false;
        }

        state.in_flight = None;
        state.applied = Some((token, capabilities));
        true
    }

    /// The most recently applied report
    pub fn current(&self) -> Option<ServerCapabilities> {
        self.state().applied.as_ref().map(|(_, caps)| caps.clone())
    }

    pub fn current_token(&self) -> Option<ProbeToken> {
        self.state().applied.as_ref().map(|(token, _)| *token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(note: &str) -> ServerCapabilities {
        let mut caps = ServerCapabilities::new();
        caps.add_note(note);
        caps
    }

    #[test]
    fn test_tokens_increase() {
        let gate = ProbeGate::new();
        let first = gate.issue().token();
        let second = gate.issue().token();
        assert!(second > first);
        assert_eq!(second.value(), first.value() + 1);
    }

    #[test]
    fn test_issue_cancels_previous() {
        let gate = ProbeGate::new();
        let first = gate.issue();
        assert!(!first.cancellation().is_cancelled());

        let second = gate.issue();
        assert!(first.cancellation().is_cancelled());
        assert!(!second.cancellation().is_cancelled());
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let gate = ProbeGate::new();
        let first = gate.issue();
        let second = gate.issue();

        // Newer probe finishes first
        assert!(gate.apply(second.token(), caps("second")));
        // Older probe finishes later and must not overwrite
        assert!(!gate.apply(first.token(), caps("first")));

        assert_eq!(gate.current().unwrap().notes, vec!["second"]);
        assert_eq!(gate.current_token(), Some(second.token()));
    }

    #[test]
    fn test_older_result_rejected_even_if_it_finishes_first() {
        let gate = ProbeGate::new();
        let first = gate.issue();
        let second = gate.issue();

        assert!(!gate.apply(first.token(), caps("first")));
        assert!(gate.current().is_none());

        assert!(gate.apply(second.token(), caps("second")));
        assert_eq!(gate.current().unwrap().notes, vec!["second"]);
    }

    #[test]
    fn test_is_current() {
        let gate = ProbeGate::new();
        let first = gate.issue();
        assert!(gate.is_current(first.token()));
        let second = gate.issue();
        assert!(!gate.is_current(first.token()));
        assert!(gate.is_current(second.token()));
    }
}
