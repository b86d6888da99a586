//! Lockstep directory
//!
//! The naming collaborator consumed by peers: an authoritative mapping from
//! peer name to reachable address. Peers register themselves on startup,
//! remove themselves on shutdown, and periodically pull `list` snapshots to
//! reconcile their active-peer sets.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use lockstep_core::{CoreError, CoreResult, PeerName};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Directory service interface.
///
/// Implementations must tolerate re-registration of an existing name by
/// overwriting the previous address.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Register a name, overwriting any previous registration
    async fn register(&self, name: PeerName, address: String) -> CoreResult<()>;

    /// Remove a registration, returning whether it existed
    async fn remove(&self, name: &PeerName) -> CoreResult<bool>;

    /// Look up the address registered for a name
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the name is not registered.
    async fn lookup(&self, name: &PeerName) -> CoreResult<String>;

    /// Snapshot of all registrations
    async fn list(&self) -> CoreResult<HashMap<PeerName, String>>;
}

/// In-process directory backed by a shared map.
///
/// Suitable for single-process clusters and tests; a networked deployment
/// would put a remote client behind the same trait.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: Arc<RwLock<HashMap<PeerName, String>>>,
}

impl MemoryDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registrations
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the directory is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn register(&self, name: PeerName, address: String) -> CoreResult<()> {
        let mut entries = self.entries.write().await;
        if let Some(previous) = entries.insert(name.clone(), address) {
            tracing::debug!(peer = %name, %previous, "re-registered over existing entry");
        }
        Ok(())
    }

    async fn remove(&self, name: &PeerName) -> CoreResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(name).is_some())
    }

    async fn lookup(&self, name: &PeerName) -> CoreResult<String> {
        let entries = self.entries.read().await;
        entries.get(name).cloned().ok_or_else(|| CoreError::NotFound {
            kind: "peer".to_string(),
            id: name.to_string(),
        })
    }

    async fn list(&self) -> CoreResult<HashMap<PeerName, String>> {
        Ok(self.entries.read().await.clone())
    }
}
