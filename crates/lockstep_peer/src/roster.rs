//! Active-peer roster.
//!
//! The membership state of one peer: every known peer's address together
//! with the last time it was seen alive. Entries are created only by
//! directory reconciliation and destroyed by heartbeat timeout or by
//! absence from a directory snapshot; holding address and last-seen in one
//! entry keeps the two maps of the protocol description in lockstep by
//! construction.

use lockstep_core::{PeerName, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A known peer: reachable address plus liveness bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Address the peer is reachable at
    pub address: String,
    /// Last heartbeat or discovery observed from the peer
    pub last_seen: Timestamp,
}

/// Changes applied by a directory reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Names newly discovered from the snapshot
    pub added: Vec<PeerName>,
    /// Names evicted because the snapshot no longer lists them
    pub removed: Vec<PeerName>,
}

impl ReconcileOutcome {
    /// Whether the pass changed anything
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Active-peer roster, shared across the engine and the background tasks
#[derive(Default)]
pub struct Roster {
    entries: Arc<RwLock<HashMap<PeerName, RosterEntry>>>,
}

impl Roster {
    /// Create an empty roster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of name/address pairs
    pub async fn addresses(&self) -> HashMap<PeerName, String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.address.clone()))
            .collect()
    }

    /// Current peer names
    pub async fn names(&self) -> Vec<PeerName> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Address of a single peer, if known
    pub async fn address(&self, name: &PeerName) -> Option<String> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|entry| entry.address.clone())
    }

    /// Number of known peers
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no peers are known
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Refresh a peer's last-seen time.
    ///
    /// Returns false for unknown peers: a heartbeat alone never creates
    /// membership, discovery is the reconciler's job.
    pub async fn mark_alive(&self, name: &PeerName, now: Timestamp) -> bool {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.last_seen = now;
            true
        } else {
            false
        }
    }

    /// Whether a peer's last-seen time is older than `timeout_ms`.
    ///
    /// Unknown peers count as stale.
    pub async fn is_stale(&self, name: &PeerName, now: Timestamp, timeout_ms: u64) -> bool {
        let entries = self.entries.read().await;
        match entries.get(name) {
            Some(entry) => now.elapsed_since(entry.last_seen) > timeout_ms,
            None => true,
        }
    }

    /// Remove a single peer, returning whether it was present
    pub async fn evict(&self, name: &PeerName) -> bool {
        self.entries.write().await.remove(name).is_some()
    }

    /// Remove every peer silent for longer than `timeout_ms`, returning the
    /// evicted names
    pub async fn evict_stale(&self, now: Timestamp, timeout_ms: u64) -> Vec<PeerName> {
        let mut entries = self.entries.write().await;
        let stale: Vec<PeerName> = entries
            .iter()
            .filter(|(_, entry)| now.elapsed_since(entry.last_seen) > timeout_ms)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            entries.remove(name);
        }
        stale
    }

    /// Merge a directory snapshot: add unknown names (except self) with
    /// `last_seen = now`, evict names absent from the snapshot.
    pub async fn reconcile(
        &self,
        snapshot: &HashMap<PeerName, String>,
        own_name: &PeerName,
        now: Timestamp,
    ) -> ReconcileOutcome {
        let mut entries = self.entries.write().await;
        let mut outcome = ReconcileOutcome::default();

        for (name, address) in snapshot {
            if name == own_name {
                continue;
            }
            if !entries.contains_key(name) {
                entries.insert(
                    name.clone(),
                    RosterEntry {
                        address: address.clone(),
                        last_seen: now,
                    },
                );
                outcome.added.push(name.clone());
            }
        }

        let gone: Vec<PeerName> = entries
            .keys()
            .filter(|name| !snapshot.contains_key(*name))
            .cloned()
            .collect();
        for name in gone {
            entries.remove(&name);
            outcome.removed.push(name);
        }

        outcome
    }
}
