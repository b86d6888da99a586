//! Lockstep peer
//!
//! Peer-to-peer distributed mutual exclusion over the Ricart-Agrawala
//! permission protocol: Lamport-clock request ordering, deferred replies,
//! heartbeat-based liveness eviction, directory-driven membership
//! reconciliation, and a bounded critical-section occupancy timer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod peer;
pub mod roster;
pub mod service;
pub mod state;
pub mod transport;

pub use config::PeerConfig;
pub use error::PeerError;
pub use peer::MutexPeer;
pub use roster::Roster;
pub use service::{MutexService, PeerInfo};
pub use state::CsState;
pub use transport::{Delivery, MemoryTransport, PeerTransport, TransportError};
