//! # Connection Registry
//!
//! Tracks live transport-level connections and owns their outbound queues.
//!
//! ## Features
//! - **Thread-safe**: maps guarded by `RwLock`, never held across I/O or
//!   callback invocations
//! - **Idempotent removal**: removing an unknown id is a no-op
//! - **Broadcast**: fan-out over a snapshot with partial-failure isolation
//! - **Group broadcast**: connections can join named groups
//! - **Inactive cleanup**: periodic eviction of connections without recent
//!   activity
//!
//! Removal invokes an injected hook so the session layer can unbind any
//! session pointing at the removed connection; the two structures must never
//! diverge. The hook is called after the registry lock is released; the
//! consistency is best-effort, and a message racing a removal surfaces as a
//! recoverable `ConnectionClosed`, not a crash.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::core::message::Message;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::Metrics;
use crate::utils::time;

/// Opaque transport connection identifier, assigned by the registry.
pub type ConnectionId = u64;

/// Transport-level connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    Closed,
}

/// One live transport socket: identity, activity tracking, and the bounded
/// outbound queue drained by the connection's writer task.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    created_at: i64,
    last_activity: AtomicI64,
    closed: AtomicBool,
    close_signal: Notify,
    sequence: AtomicU32,
    outbound: mpsc::Sender<Message>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Unix-ms creation time.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Unix-ms timestamp of the last observed activity.
    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.closed.load(Ordering::Acquire) {
            ConnectionStatus::Closed
        } else {
            ConnectionStatus::Active
        }
    }

    /// Record activity now. Last-writer-wins; ordering does not matter.
    pub fn touch(&self) {
        self.last_activity.store(time::unix_ms(), Ordering::Relaxed);
    }

    /// Next value of the per-connection monotonic outbound counter.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a message for the writer task without blocking, stamping the
    /// per-connection outbound sequence number.
    ///
    /// A full queue means the client cannot keep up and is connection-fatal
    /// (`ChannelFull`); sending on a closed connection yields
    /// `ConnectionClosed`.
    pub fn send(&self, mut msg: Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::ConnectionClosed);
        }
        msg.header.sequence = self.next_sequence();
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::ChannelFull(self.id),
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })
    }

    /// Resolves once the connection has been closed through the registry.
    ///
    /// The per-connection read loop selects on this so a registry-side
    /// removal (takeover, cleanup, heartbeat eviction) tears the socket down
    /// promptly instead of waiting for the peer.
    pub async fn closed(&self) {
        loop {
            // Arm the waiter before re-checking so a close racing this call
            // cannot be missed.
            let notified = self.close_signal.notified();
            if self.status() == ConnectionStatus::Closed {
                return;
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_signal.notify_waiters();
    }
}

type RemoveHook = Box<dyn Fn(ConnectionId) + Send + Sync>;

/// Registry of live connections with broadcast and cleanup support.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    groups: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    next_id: AtomicU64,
    remove_hook: RwLock<Option<RemoveHook>>,
    metrics: Arc<Metrics>,
}

impl ConnectionRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            remove_hook: RwLock::new(None),
            metrics,
        }
    }

    /// Install the hook invoked after a connection is removed.
    ///
    /// The session layer uses this to unbind sessions referencing the
    /// connection. Called without any registry lock held.
    pub fn set_remove_hook<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        let mut slot = self
            .remove_hook
            .write()
            .map_err(|_| ProtocolError::LockPoisoned("registry remove hook"))?;
        *slot = Some(Box::new(hook));
        Ok(())
    }

    /// Register a new connection around its outbound queue sender.
    pub fn register(
        &self,
        remote_addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
    ) -> Result<Arc<Connection>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = time::unix_ms();
        let conn = Arc::new(Connection {
            id,
            remote_addr,
            created_at: now,
            last_activity: AtomicI64::new(now),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            sequence: AtomicU32::new(0),
            outbound,
        });

        let mut connections = self
            .connections
            .write()
            .map_err(|_| ProtocolError::LockPoisoned("connection map"))?;
        connections.insert(id, Arc::clone(&conn));
        drop(connections);

        self.metrics.connection_established();
        info!(connection_id = id, peer = %remote_addr, "Connection registered");
        Ok(conn)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().ok()?.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and close a connection. Idempotent: removing an unknown id is a
    /// no-op and returns `false`.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = match self.connections.write() {
            Ok(mut map) => map.remove(&id),
            Err(_) => None,
        };

        let Some(conn) = removed else {
            return false;
        };

        conn.close();
        self.leave_all_groups(id);
        self.metrics.connection_closed();
        info!(connection_id = id, peer = %conn.remote_addr(), "Connection removed");

        // Hook runs after the lock is released so the session layer can take
        // its own locks freely.
        if let Ok(hook) = self.remove_hook.read() {
            if let Some(hook) = hook.as_ref() {
                hook(id);
            }
        }
        true
    }

    /// Queue a message on one connection.
    pub fn send_to(&self, id: ConnectionId, msg: Message) -> Result<()> {
        let conn = self
            .get(id)
            .ok_or(ProtocolError::ConnectionNotFound(id))?;
        conn.send(msg)
    }

    /// Fan a message out to every live connection.
    ///
    /// Works on a snapshot of the map; a failure on one connection is logged
    /// and does not abort delivery to the others. Returns the number of
    /// connections the message was queued on.
    pub fn broadcast(&self, msg: &Message) -> usize {
        self.metrics.broadcast();
        let targets = self.snapshot();
        self.deliver_to(&targets, msg)
    }

    /// Fan a message out to every member of a group.
    pub fn broadcast_to_group(&self, group: &str, msg: &Message) -> usize {
        self.metrics.broadcast();
        let member_ids: Vec<ConnectionId> = match self.groups.read() {
            Ok(groups) => groups
                .get(group)
                .map(|members| members.iter().copied().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        let targets: Vec<Arc<Connection>> =
            member_ids.into_iter().filter_map(|id| self.get(id)).collect();
        self.deliver_to(&targets, msg)
    }

    fn deliver_to(&self, targets: &[Arc<Connection>], msg: &Message) -> usize {
        let mut delivered = 0;
        for conn in targets {
            match conn.send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        connection_id = conn.id(),
                        error = %e,
                        "Broadcast delivery failed, continuing with remaining connections"
                    );
                }
            }
        }
        delivered
    }

    /// Add a connection to a named group.
    pub fn join_group(&self, group: &str, id: ConnectionId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(ProtocolError::ConnectionNotFound(id));
        }
        let mut groups = self
            .groups
            .write()
            .map_err(|_| ProtocolError::LockPoisoned("group map"))?;
        groups.entry(group.to_string()).or_default().insert(id);
        debug!(connection_id = id, group, "Joined group");
        Ok(())
    }

    /// Remove a connection from a named group. No-op if absent.
    pub fn leave_group(&self, group: &str, id: ConnectionId) {
        if let Ok(mut groups) = self.groups.write() {
            if let Some(members) = groups.get_mut(group) {
                members.remove(&id);
                if members.is_empty() {
                    groups.remove(group);
                }
            }
        }
    }

    fn leave_all_groups(&self, id: ConnectionId) {
        if let Ok(mut groups) = self.groups.write() {
            groups.retain(|_, members| {
                members.remove(&id);
                !members.is_empty()
            });
        }
    }

    /// Remove and close every connection without activity for `timeout`.
    ///
    /// Intended to be driven by a periodic background loop, not from the
    /// message hot path. Returns the ids that were evicted.
    pub fn cleanup_inactive(&self, timeout: Duration) -> Vec<ConnectionId> {
        let now = time::unix_ms();
        let stale: Vec<ConnectionId> = self
            .snapshot()
            .into_iter()
            .filter(|c| time::is_stale(now, c.last_activity(), timeout))
            .map(|c| c.id())
            .collect();

        for &id in &stale {
            debug!(connection_id = id, "Evicting inactive connection");
            self.remove(id);
        }
        stale
    }

    /// Point-in-time copy of all live connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(Metrics::new()))
    }

    fn test_message() -> Message {
        Message::request(1_001, 1, Bytes::from_static(b"hello"))
    }

    #[test]
    fn register_get_remove() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(4);
        let conn = reg.register(addr(), tx).unwrap();

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(conn.id()).unwrap().id(), conn.id());
        assert_eq!(conn.status(), ConnectionStatus::Active);

        assert!(reg.remove(conn.id()));
        assert_eq!(reg.len(), 0);
        assert_eq!(conn.status(), ConnectionStatus::Closed);
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(4);
        let conn = reg.register(addr(), tx).unwrap();

        assert!(reg.remove(conn.id()));
        assert!(!reg.remove(conn.id()));
        assert!(!reg.remove(999));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn remove_hook_fires_once_per_removal() {
        let reg = registry();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_hook = Arc::clone(&hits);
        reg.set_remove_hook(move |_| {
            hits_in_hook.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let (tx, _rx) = mpsc::channel(4);
        let conn = reg.register(addr(), tx).unwrap();
        reg.remove(conn.id());
        reg.remove(conn.id()); // no-op, hook must not fire again
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_isolates_per_connection_failure() {
        let reg = registry();

        let (good_tx, mut good_rx) = mpsc::channel(4);
        let good = reg.register(addr(), good_tx).unwrap();

        // Receiver dropped: sends to this connection fail.
        let (dead_tx, dead_rx) = mpsc::channel(4);
        drop(dead_rx);
        let _dead = reg.register(addr(), dead_tx).unwrap();

        let delivered = reg.broadcast(&test_message());
        assert_eq!(delivered, 1);
        assert_eq!(good_rx.try_recv().unwrap().header.message_id, 1);
        assert_eq!(reg.get(good.id()).unwrap().status(), ConnectionStatus::Active);
    }

    #[test]
    fn group_broadcast_reaches_members_only() {
        let reg = registry();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = reg.register(addr(), tx_a).unwrap();
        let _b = reg.register(addr(), tx_b).unwrap();

        reg.join_group("battle-7", a.id()).unwrap();
        let delivered = reg.broadcast_to_group("battle-7", &test_message());

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        // Removing the connection clears group membership.
        reg.remove(a.id());
        assert_eq!(reg.broadcast_to_group("battle-7", &test_message()), 0);
    }

    #[test]
    fn join_group_requires_live_connection() {
        let reg = registry();
        assert!(matches!(
            reg.join_group("g", 42),
            Err(ProtocolError::ConnectionNotFound(42))
        ));
    }

    #[test]
    fn full_queue_is_channel_full() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(1);
        let conn = reg.register(addr(), tx).unwrap();

        conn.send(test_message()).unwrap();
        match conn.send(test_message()) {
            Err(ProtocolError::ChannelFull(id)) => assert_eq!(id, conn.id()),
            other => panic!("expected ChannelFull, got {other:?}"),
        }
    }

    #[test]
    fn cleanup_evicts_only_stale_connections() {
        let reg = registry();
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);
        let stale = reg.register(addr(), tx_a).unwrap();
        let fresh = reg.register(addr(), tx_b).unwrap();

        // Backdate the stale connection's activity.
        stale
            .last_activity
            .store(time::unix_ms() - 10_000, Ordering::Relaxed);
        fresh.touch();

        let evicted = reg.cleanup_inactive(Duration::from_secs(5));
        assert_eq!(evicted, vec![stale.id()]);
        assert!(reg.get(stale.id()).is_none());
        assert!(reg.get(fresh.id()).is_some());
    }

    #[test]
    fn send_stamps_monotonic_sequence() {
        let reg = registry();
        let (tx, mut rx) = mpsc::channel(4);
        let conn = reg.register(addr(), tx).unwrap();

        conn.send(test_message()).unwrap();
        conn.send(test_message()).unwrap();
        conn.send(test_message()).unwrap();

        assert_eq!(rx.try_recv().unwrap().header.sequence, 0);
        assert_eq!(rx.try_recv().unwrap().header.sequence, 1);
        assert_eq!(rx.try_recv().unwrap().header.sequence, 2);
    }
}
