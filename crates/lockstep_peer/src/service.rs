//! The peer's RPC surface.
//!
//! The transport layer routes decoded calls into this trait; the in-memory
//! transport dispatches against it directly. Every inbound protocol message
//! and every locally-issued command goes through these methods.

use crate::error::PeerError;
use async_trait::async_trait;
use lockstep_core::PeerName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point-in-time snapshot of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer name
    pub name: PeerName,
    /// Current Lamport clock value
    pub clock: u64,
    /// Whether the peer holds the CS
    pub in_cs: bool,
    /// Known active peers, sorted by name
    pub active_peers: Vec<PeerName>,
}

/// The mutual-exclusion operation table exposed by every peer.
#[async_trait]
pub trait MutexService: Send + Sync {
    /// Request the critical section.
    ///
    /// Blocks up to the configured reply timeout. `Ok(true)` when granted,
    /// `Ok(false)` when unresponsive peers had to be evicted first (the
    /// caller may retry).
    ///
    /// # Errors
    ///
    /// Returns `PeerError::AlreadyActive` while a request is outstanding or
    /// the CS is held.
    async fn request_cs(&self) -> Result<bool, PeerError>;

    /// Release the critical section, replaying deferred replies in FIFO
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::NotHolding` when the CS is not held; state is
    /// unchanged.
    async fn release_cs(&self) -> Result<(), PeerError>;

    /// Handle an incoming REQUEST. Always acks; the REPLY itself may be
    /// sent immediately, deferred, or dropped for a stale caller.
    async fn receive_request(&self, from: PeerName, timestamp: u64) -> bool;

    /// Handle an incoming REPLY for the outstanding request
    async fn receive_reply(&self, from: PeerName) -> bool;

    /// Informational notice that `holder` currently occupies the CS
    async fn receive_in_cs_notification(&self, holder: PeerName) -> bool;

    /// Handle an incoming heartbeat, refreshing the sender's last-seen time
    async fn heartbeat(&self, from: PeerName) -> bool;

    /// Snapshot of the active-peer address map
    async fn list_active_peers(&self) -> HashMap<PeerName, String>;

    /// Snapshot of the peer's protocol state
    async fn info(&self) -> PeerInfo;

    /// Stop background tasks and cancel any armed release timer
    async fn shutdown(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_info_serializes() {
        let info = PeerInfo {
            name: PeerName::new("alpha").unwrap(),
            clock: 12,
            in_cs: true,
            active_peers: vec![PeerName::new("beta").unwrap()],
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "alpha");
        assert_eq!(json["clock"], 12);
        assert_eq!(json["in_cs"], true);
        assert_eq!(json["active_peers"][0], "beta");
    }
}
