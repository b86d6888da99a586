//! Peer protocol errors.
//!
//! Nothing here is fatal to the process: protocol violations are reported
//! back to the caller and transport failures feed the eviction logic.

use crate::transport::TransportError;

/// Peer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    /// A CS request is already requesting or holding
    #[error("CS request already active")]
    AlreadyActive,

    /// Release called while not holding the CS
    #[error("Not holding the CS")]
    NotHolding,

    /// Peer has been shut down
    #[error("Peer is shut down")]
    ShutDown,

    /// Outbound call failed
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}
