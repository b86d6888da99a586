//! The mutual-exclusion peer.
//!
//! Four cooperating sub-protocols over one state object: the Ricart-Agrawala
//! request/reply engine, the deferred-reply queue replayed on release, the
//! heartbeat liveness tracker, and the directory membership reconciler.
//!
//! Locking: protocol state sits behind one mutex, membership behind the
//! roster's lock; neither lock is ever held while acquiring the other, and
//! the protocol lock is never held across an outbound transport call. A
//! pending request waits on a notifier signalled by every incoming reply and
//! every roster shrink, bounded by the reply timeout.

use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::roster::Roster;
use crate::service::{MutexService, PeerInfo};
use crate::state::{CsState, DeferReason, ProtocolState};
use crate::transport::PeerTransport;
use async_trait::async_trait;
use lockstep_core::{Claim, PeerName, Timestamp};
use lockstep_directory::Directory;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A mutual-exclusion peer.
///
/// Created with [`MutexPeer::new`]; background liveness and reconciliation
/// start with [`MutexPeer::start`] and stop on [`MutexService::shutdown`] or
/// when the last `Arc` drops.
pub struct MutexPeer {
    config: PeerConfig,
    proto: Mutex<ProtocolState>,
    roster: Roster,
    transport: Arc<dyn PeerTransport>,
    directory: Arc<dyn Directory>,
    /// Wakes the pending request on reply arrival or roster shrink
    wakeup: Notify,
    stopped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    weak_self: Weak<MutexPeer>,
}

impl MutexPeer {
    /// Create a new peer over the given transport and directory
    #[must_use]
    pub fn new(
        config: PeerConfig,
        transport: Arc<dyn PeerTransport>,
        directory: Arc<dyn Directory>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            proto: Mutex::new(ProtocolState::new()),
            roster: Roster::new(),
            transport,
            directory,
            wakeup: Notify::new(),
            stopped: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            weak_self: weak.clone(),
        })
    }

    /// This peer's name
    #[must_use]
    pub fn name(&self) -> &PeerName {
        &self.config.name
    }

    /// This peer's address
    #[must_use]
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Whether the peer has been shut down
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Spawn the heartbeat and reconciliation loops.
    ///
    /// The loops hold only a weak reference and exit when the peer is
    /// dropped or shut down.
    pub async fn start(&self) {
        let heartbeat = {
            let weak = self.weak_self.clone();
            let period = Duration::from_millis(self.config.heartbeat_interval_ms);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // discard the immediate first tick
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(peer) = weak.upgrade() else { break };
                    if peer.is_stopped() {
                        break;
                    }
                    peer.heartbeat_sweep().await;
                }
            })
        };
        let reconcile = {
            let weak = self.weak_self.clone();
            let period = Duration::from_millis(self.config.reconcile_interval_ms);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(peer) = weak.upgrade() else { break };
                    if peer.is_stopped() {
                        break;
                    }
                    peer.reconcile().await;
                }
            })
        };

        let mut tasks = self.tasks.lock().await;
        tasks.push(heartbeat);
        tasks.push(reconcile);
    }

    /// One liveness pass: evict peers silent past the heartbeat timeout,
    /// then send a one-way heartbeat to every surviving peer.
    pub async fn heartbeat_sweep(&self) {
        let now = Timestamp::now();
        let evicted = self
            .roster
            .evict_stale(now, self.config.heartbeat_timeout_ms)
            .await;
        for peer in &evicted {
            warn!(
                peer = %self.config.name,
                evicted = %peer,
                timeout_ms = self.config.heartbeat_timeout_ms,
                "peer silent past heartbeat timeout, evicting"
            );
        }
        if !evicted.is_empty() {
            self.wakeup.notify_waiters();
        }

        for (peer, addr) in self.roster.addresses().await {
            if let Err(err) = self
                .transport
                .send_heartbeat(&addr, self.config.name.clone())
                .await
            {
                debug!(peer = %self.config.name, to = %peer, %err, "heartbeat send failed");
            }
        }
    }

    /// One reconciliation pass against the directory snapshot.
    ///
    /// The directory is the authoritative membership source; heartbeat
    /// eviction is only the faster failure path between passes.
    pub async fn reconcile(&self) {
        let snapshot = match self.directory.list().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(peer = %self.config.name, %err, "directory snapshot failed");
                return;
            }
        };

        let outcome = self
            .roster
            .reconcile(&snapshot, &self.config.name, Timestamp::now())
            .await;
        for peer in &outcome.added {
            info!(peer = %self.config.name, discovered = %peer, "discovered peer");
        }
        for peer in &outcome.removed {
            warn!(peer = %self.config.name, removed = %peer, "peer absent from directory, evicting");
        }
        if !outcome.is_noop() {
            self.wakeup.notify_waiters();
        }
    }

    /// Peers whose reply is still required, recomputed from the live roster
    async fn missing_replies(&self) -> Vec<PeerName> {
        let active = self.roster.names().await;
        let proto = self.proto.lock().await;
        active
            .into_iter()
            .filter(|name| !proto.replies.contains(name))
            .collect()
    }

    /// Arm the auto-release timer for the configured occupancy limit
    fn spawn_release_timer(&self) -> AbortHandle {
        let weak = self.weak_self.clone();
        let limit_ms = self.config.access_time_limit_ms;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(limit_ms)).await;
            let Some(peer) = weak.upgrade() else { return };
            warn!(
                peer = %peer.config.name,
                limit_ms,
                "CS occupancy limit reached, auto-releasing"
            );
            if let Err(err) = peer.release_cs().await {
                // Raced an explicit release; the state check under the
                // protocol lock makes the second drain a no-op.
                debug!(peer = %peer.config.name, %err, "auto-release found CS already released");
            }
        });
        handle.abort_handle()
    }
}

#[async_trait]
impl MutexService for MutexPeer {
    async fn request_cs(&self) -> Result<bool, PeerError> {
        if self.is_stopped() {
            return Err(PeerError::ShutDown);
        }

        let ts = {
            let mut proto = self.proto.lock().await;
            if !proto.state.is_idle() {
                warn!(peer = %self.config.name, state = ?proto.state, "request while already active");
                return Err(PeerError::AlreadyActive);
            }
            let ts = proto.clock.tick();
            proto.state = CsState::Requesting { ts };
            proto.replies.clear();
            ts
        };

        let targets = self.roster.addresses().await;
        info!(
            peer = %self.config.name,
            ts,
            targets = targets.len(),
            "requesting CS"
        );
        for (peer, addr) in &targets {
            if let Err(err) = self
                .transport
                .send_request(addr, self.config.name.clone(), ts)
                .await
            {
                // That target simply never contributes a reply.
                warn!(peer = %self.config.name, to = %peer, %err, "failed to send REQUEST");
            }
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.reply_timeout_ms);
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.missing_replies().await.is_empty() {
                break;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let missing = self.missing_replies().await;
                if missing.is_empty() {
                    break;
                }
                warn!(
                    peer = %self.config.name,
                    missing = ?missing,
                    "reply timeout, evicting unresponsive peers"
                );
                for peer in &missing {
                    self.roster.evict(peer).await;
                }
                let mut proto = self.proto.lock().await;
                proto.state = CsState::Idle;
                return Ok(false);
            }
        }

        {
            let mut proto = self.proto.lock().await;
            proto.state = CsState::InCs { ts };
            let timer = self.spawn_release_timer();
            proto.release_timer = Some(timer);
        }
        info!(peer = %self.config.name, ts, "entered the critical section");
        Ok(true)
    }

    async fn release_cs(&self) -> Result<(), PeerError> {
        let deferred = {
            let mut proto = self.proto.lock().await;
            if !proto.state.is_in_cs() {
                warn!(peer = %self.config.name, "release called while not in CS");
                return Err(PeerError::NotHolding);
            }
            proto.state = CsState::Idle;
            proto.cancel_release_timer();
            std::mem::take(&mut proto.deferred)
        };
        info!(
            peer = %self.config.name,
            deferred = deferred.len(),
            "left the critical section"
        );

        for peer in deferred {
            match self.roster.address(&peer).await {
                Some(addr) => {
                    if let Err(err) = self
                        .transport
                        .send_reply(&addr, self.config.name.clone())
                        .await
                    {
                        warn!(peer = %self.config.name, to = %peer, %err, "failed to send deferred REPLY");
                    } else {
                        debug!(peer = %self.config.name, to = %peer, "sent deferred REPLY");
                    }
                }
                None => {
                    warn!(peer = %self.config.name, to = %peer, "deferred peer evicted before release, skipping REPLY");
                }
            }
        }
        Ok(())
    }

    async fn receive_request(&self, from: PeerName, timestamp: u64) -> bool {
        let incoming = Claim::new(timestamp, from.clone());
        let deferral = {
            let mut proto = self.proto.lock().await;
            proto.clock.observe(timestamp);
            let reason = proto.defer_reason(&incoming, &self.config.name);
            if reason.is_some() {
                proto.deferred.push_back(from.clone());
            }
            reason
        };
        debug!(
            peer = %self.config.name,
            from = %from,
            timestamp,
            ?deferral,
            "received REQUEST"
        );

        match deferral {
            Some(DeferReason::Holding) => {
                // Best-effort denial notice, purely informational.
                if let Some(addr) = self.roster.address(&from).await {
                    let transport = Arc::clone(&self.transport);
                    let holder = self.config.name.clone();
                    tokio::spawn(async move {
                        if let Err(err) = transport.notify_in_cs(&addr, holder).await {
                            debug!(%err, "failed to deliver in-CS notice");
                        }
                    });
                }
            }
            Some(DeferReason::OwnClaimPrecedes) => {}
            None => {
                let now = Timestamp::now();
                if self
                    .roster
                    .is_stale(&from, now, self.config.heartbeat_timeout_ms)
                    .await
                {
                    // Presumed dead: no reply at all.
                    debug!(peer = %self.config.name, from = %from, "dropping REQUEST from stale peer");
                    return true;
                }
                match self.roster.address(&from).await {
                    Some(addr) => {
                        if let Err(err) = self
                            .transport
                            .send_reply(&addr, self.config.name.clone())
                            .await
                        {
                            warn!(peer = %self.config.name, to = %from, %err, "failed to send REPLY");
                        } else {
                            debug!(peer = %self.config.name, to = %from, "sent immediate REPLY");
                        }
                    }
                    None => {
                        debug!(peer = %self.config.name, from = %from, "no address for requester");
                    }
                }
            }
        }
        true
    }

    async fn receive_reply(&self, from: PeerName) -> bool {
        {
            let mut proto = self.proto.lock().await;
            proto.clock.tick();
            proto.replies.insert(from.clone());
        }
        debug!(peer = %self.config.name, from = %from, "received REPLY");
        self.wakeup.notify_waiters();
        true
    }

    async fn receive_in_cs_notification(&self, holder: PeerName) -> bool {
        info!(
            peer = %self.config.name,
            holder = %holder,
            "access denied, holder currently in the critical section"
        );
        true
    }

    async fn heartbeat(&self, from: PeerName) -> bool {
        self.roster.mark_alive(&from, Timestamp::now()).await;
        true
    }

    async fn list_active_peers(&self) -> HashMap<PeerName, String> {
        self.roster.addresses().await
    }

    async fn info(&self) -> PeerInfo {
        let (clock, in_cs) = {
            let proto = self.proto.lock().await;
            (proto.clock.value(), proto.state.is_in_cs())
        };
        let mut active_peers = self.roster.names().await;
        active_peers.sort();
        PeerInfo {
            name: self.config.name.clone(),
            clock,
            in_cs,
            active_peers,
        }
    }

    async fn shutdown(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return true;
        }
        {
            let mut proto = self.proto.lock().await;
            proto.cancel_release_timer();
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!(peer = %self.config.name, "peer shut down");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use lockstep_directory::MemoryDirectory;

    fn name(s: &str) -> PeerName {
        PeerName::new(s).unwrap()
    }

    fn solo_peer(s: &str) -> Arc<MutexPeer> {
        let config = PeerConfig::new(name(s), format!("mem://{s}"));
        MutexPeer::new(
            config,
            Arc::new(MemoryTransport::new()),
            Arc::new(MemoryDirectory::new()),
        )
    }

    #[tokio::test]
    async fn test_fresh_peer_info() {
        let peer = solo_peer("alpha");
        let info = peer.info().await;
        assert_eq!(info.name, name("alpha"));
        assert_eq!(info.clock, 0);
        assert!(!info.in_cs);
        assert!(info.active_peers.is_empty());
    }

    #[tokio::test]
    async fn test_solo_peer_grant_and_release() {
        let peer = solo_peer("alpha");

        // No other peers known: the reply set requirement is empty.
        assert!(peer.request_cs().await.unwrap());
        assert!(peer.info().await.in_cs);

        peer.release_cs().await.unwrap();
        assert!(!peer.info().await.in_cs);
    }

    #[tokio::test]
    async fn test_request_while_active_is_rejected() {
        let peer = solo_peer("alpha");
        assert!(peer.request_cs().await.unwrap());

        let err = peer.request_cs().await.unwrap_err();
        assert_eq!(err, PeerError::AlreadyActive);

        // Still holding; the failed call must not have clobbered state.
        assert!(peer.info().await.in_cs);
    }

    #[tokio::test]
    async fn test_release_without_holding() {
        let peer = solo_peer("alpha");
        let err = peer.release_cs().await.unwrap_err();
        assert_eq!(err, PeerError::NotHolding);
    }

    #[tokio::test]
    async fn test_clock_advances_on_local_and_remote_events() {
        let peer = solo_peer("alpha");

        peer.receive_request(name("beta"), 10).await;
        assert_eq!(peer.info().await.clock, 11);

        peer.receive_reply(name("beta")).await;
        assert_eq!(peer.info().await.clock, 12);
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_peer_adds_nothing() {
        let peer = solo_peer("alpha");
        assert!(peer.heartbeat(name("ghost")).await);
        assert!(peer.list_active_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let peer = solo_peer("alpha");
        peer.start().await;
        assert!(peer.shutdown().await);
        assert!(peer.shutdown().await);
        assert!(peer.is_stopped());

        let err = peer.request_cs().await.unwrap_err();
        assert_eq!(err, PeerError::ShutDown);
    }

    #[tokio::test]
    async fn test_auto_release_bounds_occupancy() {
        let config = PeerConfig::new(name("alpha"), "mem://alpha".to_string())
            .with_access_time_limit(50);
        let peer = MutexPeer::new(
            config,
            Arc::new(MemoryTransport::new()),
            Arc::new(MemoryDirectory::new()),
        );

        assert!(peer.request_cs().await.unwrap());
        assert!(peer.info().await.in_cs);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!peer.info().await.in_cs);
    }

    #[tokio::test]
    async fn test_explicit_release_cancels_timer() {
        let config = PeerConfig::new(name("alpha"), "mem://alpha".to_string())
            .with_access_time_limit(50);
        let peer = MutexPeer::new(
            config,
            Arc::new(MemoryTransport::new()),
            Arc::new(MemoryDirectory::new()),
        );

        assert!(peer.request_cs().await.unwrap());
        peer.release_cs().await.unwrap();

        // The timer must not fire a second release later on.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(peer.release_cs().await.unwrap_err(), PeerError::NotHolding);
    }
}
