//! # Session Management
//!
//! Owns the session state machines bound to connections and the
//! player → session index.
//!
//! ## State Machine
//! ```text
//! New → Connected → Authenticated → Active ⇄ Idle → Disconnecting → Disconnected
//! ```
//! Authentication is permitted from `New` or `Connected`. `Disconnected` is
//! terminal: the session is removed from all maps and never reused.
//!
//! ## Invariants
//! - At most one session holds a given player id at any time. Binding a
//!   player who already has a live session evicts the older session, a
//!   forced takeover ("last login wins"), reported to the caller so the
//!   evicted client can be notified.
//! - The player index is kept in lock-step with the session map: both live
//!   under one lock, so no reader can observe them diverged.
//!
//! A periodic idle sweep marks sessions `Idle` past their idle timeout and
//! removes those idle beyond a grace period (or already `Disconnected`),
//! bounding memory growth from abandoned connections.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, Result};
use crate::transport::registry::ConnectionId;
use crate::utils::metrics::Metrics;
use crate::utils::time;

/// Opaque session identifier.
pub type SessionId = String;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connected,
    Authenticated,
    Active,
    Idle,
    Disconnecting,
    Disconnected,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::New => "new",
            SessionState::Connected => "connected",
            SessionState::Authenticated => "authenticated",
            SessionState::Active => "active",
            SessionState::Idle => "idle",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Disconnected
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            // Teardown is reachable from every live state.
            (s, Disconnecting) if s != Disconnected => true,
            (s, Disconnected) if s != Disconnected => true,
            (New, Connected) => true,
            // Auth is permitted straight from New for transports without a
            // dedicated handshake step.
            (New, Authenticated) | (Connected, Authenticated) => true,
            (Authenticated, Active) | (Authenticated, Idle) => true,
            (Active, Idle) | (Idle, Active) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical client interaction bound to exactly one connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub connection_id: ConnectionId,
    /// `None` until authenticated.
    pub player_id: Option<u64>,
    pub state: SessionState,
    pub created_at: i64,
    pub last_activity: i64,
    pub auth_time: Option<i64>,
    pub idle_timeout: Duration,
    /// Arbitrary per-session key/value data for handlers.
    pub data: HashMap<String, String>,
}

/// Typed snapshot of session identity passed into handlers.
///
/// Replaces ambient stringly-keyed context propagation: handlers receive the
/// identity fields they need by value.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub player_id: Option<u64>,
    pub state: SessionState,
}

impl SessionContext {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            connection_id: session.connection_id,
            player_id: session.player_id,
            state: session.state,
        }
    }
}

/// Outcome of one idle-sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions newly marked Idle this pass.
    pub marked_idle: Vec<SessionId>,
    /// Sessions removed (idle beyond grace, or already terminal).
    pub removed: Vec<SessionId>,
}

/// Both maps live under one lock so the player index can never be observed
/// out of step with the session map.
#[derive(Default)]
struct SessionMaps {
    sessions: HashMap<SessionId, Session>,
    by_player: HashMap<u64, SessionId>,
}

/// Owns all session state machines.
pub struct SessionManager {
    maps: RwLock<SessionMaps>,
    idle_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            maps: RwLock::new(SessionMaps::default()),
            idle_timeout,
            metrics,
        }
    }

    /// Create a session for a freshly accepted connection. Always succeeds;
    /// initial state is `New`.
    pub fn create_session(&self, connection_id: ConnectionId) -> Result<Session> {
        self.create_session_with_id(generate_session_id(), connection_id)
    }

    /// Create a session with a caller-provided id.
    pub fn create_session_with_id(
        &self,
        session_id: SessionId,
        connection_id: ConnectionId,
    ) -> Result<Session> {
        let now = time::unix_ms();
        let session = Session {
            id: session_id.clone(),
            connection_id,
            player_id: None,
            state: SessionState::New,
            created_at: now,
            last_activity: now,
            auth_time: None,
            idle_timeout: self.idle_timeout,
            data: HashMap::new(),
        };

        let mut maps = self.write_maps()?;
        maps.sessions.insert(session_id.clone(), session.clone());
        drop(maps);

        self.metrics.session_created();
        debug!(session_id = %session_id, connection_id, "Session created");
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.maps.read().ok()?.sessions.get(session_id).cloned()
    }

    /// O(1) lookup through the player index.
    pub fn get_by_player(&self, player_id: u64) -> Option<Session> {
        let maps = self.maps.read().ok()?;
        let sid = maps.by_player.get(&player_id)?;
        maps.sessions.get(sid).cloned()
    }

    pub fn get_by_connection(&self, connection_id: ConnectionId) -> Option<Session> {
        let maps = self.maps.read().ok()?;
        maps.sessions
            .values()
            .find(|s| s.connection_id == connection_id)
            .cloned()
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        self.maps
            .read()
            .map(|m| m.sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.maps.read().map(|m| m.sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed context snapshot for handler dispatch.
    pub fn context_for(&self, session_id: &str) -> Result<SessionContext> {
        self.get(session_id)
            .map(|s| SessionContext::from_session(&s))
            .ok_or_else(|| ProtocolError::SessionNotFound(session_id.to_string()))
    }

    /// Drive the state machine, rejecting illegal transitions.
    pub fn transition(&self, session_id: &str, next: SessionState) -> Result<()> {
        let mut maps = self.write_maps()?;
        let session = maps
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ProtocolError::SessionNotFound(session_id.to_string()))?;

        if !session.state.can_transition_to(next) {
            return Err(ProtocolError::InvalidTransition {
                from: session.state.as_str(),
                to: next.as_str(),
            });
        }

        debug!(
            session_id = %session_id,
            from = %session.state,
            to = %next,
            "Session transition"
        );
        session.state = next;
        Ok(())
    }

    /// Transport handshake complete.
    pub fn mark_connected(&self, session_id: &str) -> Result<()> {
        self.transition(session_id, SessionState::Connected)
    }

    /// Bind an authenticated player to a session.
    ///
    /// If the player already holds a *different* live session, that session is
    /// transitioned to `Disconnecting` and unbound: forced takeover, last
    /// login wins. The evicted session is returned so the caller can notify
    /// and tear down the old connection; `None` means no takeover happened.
    pub fn bind_player(&self, session_id: &str, player_id: u64) -> Result<Option<Session>> {
        let mut maps = self.write_maps()?;

        if !maps.sessions.contains_key(session_id) {
            return Err(ProtocolError::SessionNotFound(session_id.to_string()));
        }

        // Evict any previous holder of this player id.
        let mut evicted = None;
        if let Some(old_sid) = maps.by_player.get(&player_id).cloned() {
            if old_sid != session_id {
                if let Some(old) = maps.sessions.get_mut(&old_sid) {
                    if old.state.can_transition_to(SessionState::Disconnecting) {
                        old.state = SessionState::Disconnecting;
                    }
                    old.player_id = None;
                    evicted = Some(old.clone());
                }
                maps.by_player.remove(&player_id);
            }
        }

        let session = maps
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ProtocolError::SessionNotFound(session_id.to_string()))?;

        if !matches!(
            session.state,
            SessionState::New | SessionState::Connected | SessionState::Authenticated
        ) {
            return Err(ProtocolError::InvalidTransition {
                from: session.state.as_str(),
                to: SessionState::Authenticated.as_str(),
            });
        }

        let now = time::unix_ms();
        session.player_id = Some(player_id);
        session.auth_time = Some(now);
        session.last_activity = now;
        session.state = SessionState::Authenticated;
        maps.by_player.insert(player_id, session_id.to_string());
        drop(maps);

        if let Some(old) = &evicted {
            self.metrics.session_takeover();
            warn!(
                player_id,
                evicted_session = %old.id,
                new_session = %session_id,
                "Forced session takeover: last login wins"
            );
        } else {
            info!(player_id, session_id = %session_id, "Player bound to session");
        }
        Ok(evicted)
    }

    /// Record activity on a session, returning it to `Active` if it was
    /// `Authenticated` or `Idle`.
    pub fn update_activity(&self, session_id: &str) -> Result<()> {
        let mut maps = self.write_maps()?;
        let session = maps
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ProtocolError::SessionNotFound(session_id.to_string()))?;

        session.last_activity = time::unix_ms();
        if matches!(
            session.state,
            SessionState::Authenticated | SessionState::Idle
        ) {
            session.state = SessionState::Active;
        }
        Ok(())
    }

    /// Store a key/value pair on the session.
    pub fn set_data(&self, session_id: &str, key: &str, value: &str) -> Result<()> {
        let mut maps = self.write_maps()?;
        let session = maps
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ProtocolError::SessionNotFound(session_id.to_string()))?;
        session.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn get_data(&self, session_id: &str, key: &str) -> Option<String> {
        self.maps
            .read()
            .ok()?
            .sessions
            .get(session_id)?
            .data
            .get(key)
            .cloned()
    }

    /// Remove a session: unbind its player index entry, mark it
    /// `Disconnected`, and delete it. Idempotent.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = match self.write_maps() {
            Ok(mut maps) => {
                let removed = maps.sessions.remove(session_id);
                if let Some(session) = &removed {
                    if let Some(pid) = session.player_id {
                        // Only clear the index if it still points at us.
                        if maps.by_player.get(&pid).map(String::as_str) == Some(session_id) {
                            maps.by_player.remove(&pid);
                        }
                    }
                }
                removed
            }
            Err(_) => None,
        };

        if let Some(mut session) = removed {
            session.state = SessionState::Disconnected;
            self.metrics.session_removed();
            debug!(session_id = %session_id, "Session removed");
            true
        } else {
            false
        }
    }

    /// Remove every session bound to a connection. Invoked from the registry's
    /// remove hook so the two structures never diverge.
    pub fn remove_by_connection(&self, connection_id: ConnectionId) -> usize {
        let ids: Vec<SessionId> = self
            .all_sessions()
            .into_iter()
            .filter(|s| s.connection_id == connection_id)
            .map(|s| s.id)
            .collect();

        let mut removed = 0;
        for id in ids {
            if self.remove(&id) {
                removed += 1;
            }
        }
        removed
    }

    /// One idle-sweep pass.
    ///
    /// Marks sessions `Idle` once inactive past their idle timeout, and
    /// removes sessions inactive beyond the timeout plus `grace` (or already
    /// in a terminal/disconnecting state).
    pub fn sweep(&self, grace: Duration) -> SweepReport {
        let now = time::unix_ms();
        let mut report = SweepReport::default();

        let mut to_remove = Vec::new();
        if let Ok(mut maps) = self.write_maps() {
            for session in maps.sessions.values_mut() {
                let idle = time::is_stale(now, session.last_activity, session.idle_timeout);
                let expired = time::is_stale(
                    now,
                    session.last_activity,
                    session.idle_timeout + grace,
                );

                if matches!(
                    session.state,
                    SessionState::Disconnecting | SessionState::Disconnected
                ) || expired
                {
                    to_remove.push(session.id.clone());
                } else if idle
                    && matches!(
                        session.state,
                        SessionState::Active | SessionState::Authenticated
                    )
                {
                    session.state = SessionState::Idle;
                    report.marked_idle.push(session.id.clone());
                }
            }
        }

        for id in to_remove {
            if self.remove(&id) {
                report.removed.push(id);
            }
        }

        if !report.marked_idle.is_empty() || !report.removed.is_empty() {
            info!(
                marked_idle = report.marked_idle.len(),
                removed = report.removed.len(),
                "Idle sweep completed"
            );
            self.metrics.idle_swept(report.removed.len() as u64);
        }
        report
    }

    /// Spawn the periodic idle sweep. Exits promptly when `shutdown_rx`
    /// receives a value or closes.
    pub fn spawn_idle_sweep(
        self: &Arc<Self>,
        interval: Duration,
        grace: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Idle sweep shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        manager.sweep(grace);
                    }
                }
            }
        })
    }

    fn write_maps(&self) -> Result<std::sync::RwLockWriteGuard<'_, SessionMaps>> {
        self.maps
            .write()
            .map_err(|_| ProtocolError::LockPoisoned("session maps"))
    }
}

/// Random 16-hex-char session id.
fn generate_session_id() -> SessionId {
    let n: u64 = rand::rng().random();
    format!("s-{n:016x}")
}
