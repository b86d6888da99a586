//! Outbound transport seam.
//!
//! Peers issue already-routable calls through `PeerTransport`; the wire
//! format behind it is out of scope. Every send is fire-and-forget from the
//! protocol's point of view: failures are reported to the caller, logged
//! there, and fed into eviction, never escalated. Implementations must bound
//! each call with their own timeout.

use crate::service::MutexService;
use async_trait::async_trait;
use lockstep_core::PeerName;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No route to the address
    #[error("Peer unreachable at {0}")]
    Unreachable(String),

    /// The call did not complete in time
    #[error("Call timed out after {0}ms")]
    Timeout(u64),
}

/// Outbound calls a peer can issue
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send REQUEST(from, timestamp) to the peer at `addr`
    async fn send_request(
        &self,
        addr: &str,
        from: PeerName,
        timestamp: u64,
    ) -> Result<(), TransportError>;

    /// Send REPLY(from) to the peer at `addr`
    async fn send_reply(&self, addr: &str, from: PeerName) -> Result<(), TransportError>;

    /// Send a one-way HEARTBEAT(from) to the peer at `addr`
    async fn send_heartbeat(&self, addr: &str, from: PeerName) -> Result<(), TransportError>;

    /// Best-effort notice that `holder` occupies the CS
    async fn notify_in_cs(&self, addr: &str, holder: PeerName) -> Result<(), TransportError>;
}

/// One message routed through the in-memory transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// REQUEST delivered to `to`
    Request {
        /// Destination address
        to: String,
        /// Requesting peer
        from: PeerName,
        /// Claim timestamp
        timestamp: u64,
    },
    /// REPLY delivered to `to`
    Reply {
        /// Destination address
        to: String,
        /// Replying peer
        from: PeerName,
    },
    /// HEARTBEAT delivered to `to`
    Heartbeat {
        /// Destination address
        to: String,
        /// Sending peer
        from: PeerName,
    },
    /// In-CS notice delivered to `to`
    InCsNotice {
        /// Destination address
        to: String,
        /// Current CS holder
        holder: PeerName,
    },
}

/// In-process transport routing calls straight into registered services.
///
/// Records every successful delivery in order, so tests can assert on
/// message sequences; a disconnected address behaves like a crashed peer.
#[derive(Default)]
pub struct MemoryTransport {
    routes: RwLock<HashMap<String, Arc<dyn MutexService>>>,
    log: Mutex<Vec<Delivery>>,
}

impl MemoryTransport {
    /// Create an empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a service at an address
    pub async fn attach(&self, addr: impl Into<String>, service: Arc<dyn MutexService>) {
        self.routes.write().await.insert(addr.into(), service);
    }

    /// Detach an address, simulating an unreachable peer
    pub async fn detach(&self, addr: &str) -> bool {
        self.routes.write().await.remove(addr).is_some()
    }

    /// Ordered log of every delivered message
    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().await.clone()
    }

    async fn route(&self, addr: &str) -> Result<Arc<dyn MutexService>, TransportError> {
        self.routes
            .read()
            .await
            .get(addr)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(addr.to_string()))
    }

    async fn record(&self, delivery: Delivery) {
        self.log.lock().await.push(delivery);
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn send_request(
        &self,
        addr: &str,
        from: PeerName,
        timestamp: u64,
    ) -> Result<(), TransportError> {
        let target = self.route(addr).await?;
        self.record(Delivery::Request {
            to: addr.to_string(),
            from: from.clone(),
            timestamp,
        })
        .await;
        target.receive_request(from, timestamp).await;
        Ok(())
    }

    async fn send_reply(&self, addr: &str, from: PeerName) -> Result<(), TransportError> {
        let target = self.route(addr).await?;
        self.record(Delivery::Reply {
            to: addr.to_string(),
            from: from.clone(),
        })
        .await;
        target.receive_reply(from).await;
        Ok(())
    }

    async fn send_heartbeat(&self, addr: &str, from: PeerName) -> Result<(), TransportError> {
        let target = self.route(addr).await?;
        self.record(Delivery::Heartbeat {
            to: addr.to_string(),
            from: from.clone(),
        })
        .await;
        target.heartbeat(from).await;
        Ok(())
    }

    async fn notify_in_cs(&self, addr: &str, holder: PeerName) -> Result<(), TransportError> {
        let target = self.route(addr).await?;
        self.record(Delivery::InCsNotice {
            to: addr.to_string(),
            holder: holder.clone(),
        })
        .await;
        target.receive_in_cs_notification(holder).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::PeerInfo;

    fn name(s: &str) -> PeerName {
        PeerName::new(s).unwrap()
    }

    /// Records which service methods were invoked.
    #[derive(Default)]
    struct ProbeService {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MutexService for ProbeService {
        async fn request_cs(&self) -> Result<bool, crate::error::PeerError> {
            Ok(false)
        }

        async fn release_cs(&self) -> Result<(), crate::error::PeerError> {
            Ok(())
        }

        async fn receive_request(&self, from: PeerName, timestamp: u64) -> bool {
            self.calls
                .lock()
                .await
                .push(format!("request:{from}:{timestamp}"));
            true
        }

        async fn receive_reply(&self, from: PeerName) -> bool {
            self.calls.lock().await.push(format!("reply:{from}"));
            true
        }

        async fn receive_in_cs_notification(&self, holder: PeerName) -> bool {
            self.calls.lock().await.push(format!("notice:{holder}"));
            true
        }

        async fn heartbeat(&self, from: PeerName) -> bool {
            self.calls.lock().await.push(format!("heartbeat:{from}"));
            true
        }

        async fn list_active_peers(&self) -> HashMap<PeerName, String> {
            HashMap::new()
        }

        async fn info(&self) -> PeerInfo {
            PeerInfo {
                name: name("probe"),
                clock: 0,
                in_cs: false,
                active_peers: Vec::new(),
            }
        }

        async fn shutdown(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_unreachable_address() {
        let transport = MemoryTransport::new();
        let err = transport
            .send_reply("mem://ghost", name("alpha"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Unreachable("mem://ghost".to_string()));
        assert!(transport.deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn test_routes_calls_to_attached_service() {
        let transport = MemoryTransport::new();
        let probe = Arc::new(ProbeService::default());
        transport.attach("mem://probe", probe.clone()).await;

        transport
            .send_request("mem://probe", name("alpha"), 3)
            .await
            .unwrap();
        transport.send_reply("mem://probe", name("alpha")).await.unwrap();
        transport
            .send_heartbeat("mem://probe", name("alpha"))
            .await
            .unwrap();
        transport
            .notify_in_cs("mem://probe", name("alpha"))
            .await
            .unwrap();

        let calls = probe.calls.lock().await.clone();
        assert_eq!(
            calls,
            vec![
                "request:alpha:3".to_string(),
                "reply:alpha".to_string(),
                "heartbeat:alpha".to_string(),
                "notice:alpha".to_string(),
            ]
        );
        assert_eq!(transport.deliveries().await.len(), 4);
    }

    #[tokio::test]
    async fn test_detach_makes_address_unreachable() {
        let transport = MemoryTransport::new();
        let probe = Arc::new(ProbeService::default());
        transport.attach("mem://probe", probe).await;

        assert!(transport.detach("mem://probe").await);
        assert!(!transport.detach("mem://probe").await);

        let err = transport
            .send_heartbeat("mem://probe", name("alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_delivery_log_preserves_order() {
        let transport = MemoryTransport::new();
        let probe = Arc::new(ProbeService::default());
        transport.attach("mem://probe", probe).await;

        transport.send_reply("mem://probe", name("x")).await.unwrap();
        transport.send_reply("mem://probe", name("y")).await.unwrap();

        let log = transport.deliveries().await;
        assert_eq!(
            log,
            vec![
                Delivery::Reply {
                    to: "mem://probe".to_string(),
                    from: name("x"),
                },
                Delivery::Reply {
                    to: "mem://probe".to_string(),
                    from: name("y"),
                },
            ]
        );
    }
}
