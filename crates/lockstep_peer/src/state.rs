//! Critical-section protocol state.
//!
//! One peer owns exactly one `ProtocolState`, serialized behind a single
//! mutex. The request timestamp lives inside the non-idle `CsState`
//! variants, so it is present exactly when the state machine says it must
//! be.

use lockstep_core::{Claim, LamportClock, PeerName};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tokio::task::AbortHandle;

/// Critical-section state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsState {
    /// Not interested in the CS
    Idle,
    /// REQUEST broadcast, collecting replies
    Requesting {
        /// Clock value recorded when the request was issued
        ts: u64,
    },
    /// Holding the CS
    InCs {
        /// Clock value of the granted request
        ts: u64,
    },
}

impl CsState {
    /// Whether the peer currently holds the CS
    #[must_use]
    pub fn is_in_cs(&self) -> bool {
        matches!(self, Self::InCs { .. })
    }

    /// Whether the peer is idle
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The outstanding request timestamp, if any
    #[must_use]
    pub fn request_ts(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Requesting { ts } | Self::InCs { ts } => Some(*ts),
        }
    }
}

/// Why a reply was withheld
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// We hold the CS
    Holding,
    /// Our outstanding claim precedes the caller's
    OwnClaimPrecedes,
}

/// Mutable protocol state of a single peer, guarded by the CS lock.
///
/// `replies` is only meaningful while `state` is `Requesting`; it is cleared
/// at the start of every new request. `deferred` grows only while the state
/// is non-idle and drains exactly once per CS occupancy, at release.
pub struct ProtocolState {
    /// Lamport clock
    pub clock: LamportClock,
    /// CS state machine
    pub state: CsState,
    /// Peers that replied to the current outstanding request
    pub replies: HashSet<PeerName>,
    /// Peers whose reply was withheld, FIFO
    pub deferred: VecDeque<PeerName>,
    /// Armed auto-release timer, at most one
    pub release_timer: Option<AbortHandle>,
}

impl ProtocolState {
    /// Create idle state with a zeroed clock
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: LamportClock::new(),
            state: CsState::Idle,
            replies: HashSet::new(),
            deferred: VecDeque::new(),
            release_timer: None,
        }
    }

    /// The local outstanding claim, if the peer is non-idle
    #[must_use]
    pub fn own_claim(&self, own_name: &PeerName) -> Option<Claim> {
        self.state
            .request_ts()
            .map(|ts| Claim::new(ts, own_name.clone()))
    }

    /// Decide whether an incoming claim must be deferred.
    ///
    /// Defers while holding the CS, or while requesting when the incoming
    /// claim does not strictly precede our own.
    #[must_use]
    pub fn defer_reason(&self, incoming: &Claim, own_name: &PeerName) -> Option<DeferReason> {
        match self.state {
            CsState::InCs { .. } => Some(DeferReason::Holding),
            CsState::Requesting { ts } => {
                let ours = Claim::new(ts, own_name.clone());
                if incoming.precedes(&ours) {
                    None
                } else {
                    Some(DeferReason::OwnClaimPrecedes)
                }
            }
            CsState::Idle => None,
        }
    }

    /// Cancel the armed release timer, if any
    pub fn cancel_release_timer(&mut self) {
        if let Some(timer) = self.release_timer.take() {
            timer.abort();
        }
    }
}

impl Default for ProtocolState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PeerName {
        PeerName::new(s).unwrap()
    }

    #[test]
    fn test_cs_state_request_ts() {
        assert_eq!(CsState::Idle.request_ts(), None);
        assert_eq!(CsState::Requesting { ts: 4 }.request_ts(), Some(4));
        assert_eq!(CsState::InCs { ts: 9 }.request_ts(), Some(9));
    }

    #[test]
    fn test_idle_never_defers() {
        let state = ProtocolState::new();
        let incoming = Claim::new(1, name("beta"));
        assert_eq!(state.defer_reason(&incoming, &name("alpha")), None);
    }

    #[test]
    fn test_holding_always_defers() {
        let mut state = ProtocolState::new();
        state.state = CsState::InCs { ts: 2 };
        let incoming = Claim::new(1, name("beta"));
        assert_eq!(
            state.defer_reason(&incoming, &name("alpha")),
            Some(DeferReason::Holding)
        );
    }

    #[test]
    fn test_requesting_defers_later_claims() {
        let mut state = ProtocolState::new();
        state.state = CsState::Requesting { ts: 5 };

        // A strictly earlier claim gets its reply immediately.
        let earlier = Claim::new(4, name("zeta"));
        assert_eq!(state.defer_reason(&earlier, &name("alpha")), None);

        // A strictly later claim is deferred.
        let later = Claim::new(6, name("beta"));
        assert_eq!(
            state.defer_reason(&later, &name("alpha")),
            Some(DeferReason::OwnClaimPrecedes)
        );
    }

    #[test]
    fn test_requesting_equal_timestamp_ties_on_name() {
        let mut state = ProtocolState::new();
        state.state = CsState::Requesting { ts: 5 };

        // "alpha" < "beta": beta's equal-timestamp claim is deferred by alpha,
        let incoming = Claim::new(5, name("beta"));
        assert_eq!(
            state.defer_reason(&incoming, &name("alpha")),
            Some(DeferReason::OwnClaimPrecedes)
        );

        // while alpha's equal-timestamp claim wins against beta.
        let incoming = Claim::new(5, name("alpha"));
        assert_eq!(state.defer_reason(&incoming, &name("beta")), None);
    }

    #[test]
    fn test_own_claim() {
        let mut state = ProtocolState::new();
        assert_eq!(state.own_claim(&name("alpha")), None);

        state.state = CsState::Requesting { ts: 7 };
        assert_eq!(
            state.own_claim(&name("alpha")),
            Some(Claim::new(7, name("alpha")))
        );
    }
}
