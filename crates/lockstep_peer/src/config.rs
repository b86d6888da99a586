//! Peer configuration.

use lockstep_core::PeerName;
use serde::{Deserialize, Serialize};

/// Peer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Name of this peer
    pub name: PeerName,
    /// Address this peer is reachable at
    pub address: String,
    /// Maximum CS occupancy before auto-release, in milliseconds
    pub access_time_limit_ms: u64,
    /// Heartbeat send period in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Silence threshold before a peer is presumed dead, in milliseconds
    pub heartbeat_timeout_ms: u64,
    /// Maximum wait for the full reply set in milliseconds
    pub reply_timeout_ms: u64,
    /// Directory reconciliation period in milliseconds
    pub reconcile_interval_ms: u64,
}

impl PeerConfig {
    /// Create a new peer config with default timings
    #[must_use]
    pub fn new(name: PeerName, address: String) -> Self {
        Self {
            name,
            address,
            access_time_limit_ms: 10_000,
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 3_000,
            reply_timeout_ms: 25_000,
            reconcile_interval_ms: 1_000,
        }
    }

    /// Set the CS occupancy limit
    #[must_use]
    pub fn with_access_time_limit(mut self, limit_ms: u64) -> Self {
        self.access_time_limit_ms = limit_ms;
        self
    }

    /// Set the heartbeat send period
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    /// Set the heartbeat silence threshold
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout_ms: u64) -> Self {
        self.heartbeat_timeout_ms = timeout_ms;
        self
    }

    /// Set the reply-collection timeout
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout_ms: u64) -> Self {
        self.reply_timeout_ms = timeout_ms;
        self
    }

    /// Set the directory reconciliation period
    #[must_use]
    pub fn with_reconcile_interval(mut self, interval_ms: u64) -> Self {
        self.reconcile_interval_ms = interval_ms;
        self
    }
}
