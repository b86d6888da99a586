//! Lamport logical clocks and claim ordering.
//!
//! Every protocol event advances the clock; receipt of a remote timestamp
//! merges it as `max(local, remote) + 1`. The clock value never decreases.

use crate::name::PeerName;
use serde::{Deserialize, Serialize};

/// Lamport logical clock - monotonically non-decreasing counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LamportClock(u64);

impl LamportClock {
    /// Create a new clock at zero
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Current clock value
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Advance by one local tick, returning the new value
    pub fn tick(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    /// Merge a remote timestamp: `max(local, remote) + 1`
    pub fn observe(&mut self, remote: u64) -> u64 {
        self.0 = self.0.max(remote) + 1;
        self.0
    }
}

impl std::fmt::Display for LamportClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A CS claim: the `(timestamp, name)` pair carried by a REQUEST.
///
/// Claims are totally ordered, timestamp first, name as the deterministic
/// tie-break. The critical section is granted in increasing claim order
/// among simultaneously active requesters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Claim {
    /// Clock value recorded when the request was issued
    pub timestamp: u64,
    /// Name of the requesting peer
    pub name: PeerName,
}

impl Claim {
    /// Create a new claim
    #[must_use]
    pub fn new(timestamp: u64, name: PeerName) -> Self {
        Self { timestamp, name }
    }

    /// Whether this claim strictly precedes another in `(timestamp, name)`
    /// order
    #[must_use]
    pub fn precedes(&self, other: &Claim) -> bool {
        self < other
    }
}

impl std::fmt::Display for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.timestamp, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn name(s: &str) -> PeerName {
        PeerName::new(s).unwrap()
    }

    #[test]
    fn test_tick_advances() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.value(), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn test_observe_merges_remote() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.observe(10), 11);
        // A stale remote timestamp still advances the clock.
        assert_eq!(clock.observe(3), 12);
    }

    #[test]
    fn test_claim_orders_by_timestamp_first() {
        let early = Claim::new(4, name("zeta"));
        let late = Claim::new(5, name("alpha"));
        assert!(early.precedes(&late));
        assert!(!late.precedes(&early));
    }

    #[test]
    fn test_claim_ties_break_on_name() {
        let a = Claim::new(5, name("alpha"));
        let b = Claim::new(5, name("beta"));
        assert!(a.precedes(&b));
        assert!(!b.precedes(&a));
    }

    #[test]
    fn test_claim_never_precedes_itself() {
        let a = Claim::new(7, name("alpha"));
        assert!(!a.precedes(&a.clone()));
    }

    proptest! {
        #[test]
        fn prop_clock_never_decreases(events in prop::collection::vec(prop::option::of(0u64..10_000), 1..64)) {
            let mut clock = LamportClock::new();
            let mut prev = clock.value();
            for event in events {
                let next = match event {
                    Some(remote) => clock.observe(remote),
                    None => clock.tick(),
                };
                prop_assert!(next > prev);
                prev = next;
            }
        }

        #[test]
        fn prop_observe_exceeds_remote(remote in 0u64..u64::MAX / 2) {
            let mut clock = LamportClock::new();
            prop_assert!(clock.observe(remote) > remote);
        }
    }
}
