//! # Heartbeat Supervision
//!
//! Periodic liveness probing of tracked connections.
//!
//! A single ticking task scans all tracked connections per interval rather
//! than keeping one timer per connection: probe latency precision is traded
//! for a bounded, predictable number of timer resources regardless of
//! connection count. Heartbeat intervals are on the order of seconds, so the
//! imprecision is irrelevant.
//!
//! Per scan, a connection silent for longer than the configured timeout
//! accrues a missed probe and is marked not-alive; at `max_missed` it is
//! declared dead, closed, untracked, and the disconnect hook fires so the
//! session and registry layers clean up. A probe reply resets the missed
//! count and records the round-trip time.
//!
//! Interval, timeout, and max-missed can be reconfigured at runtime; the
//! probe loop re-reads the interval under a lock each tick, so in-flight
//! scans are never disturbed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::core::message::Message;
use crate::transport::registry::{ConnectionId, ConnectionRegistry};
use crate::utils::metrics::Metrics;
use crate::utils::time;

/// Per-connection liveness record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStatus {
    /// Unix-ms timestamp of the last probe sent. 0 before the first probe.
    pub last_sent: i64,
    /// Unix-ms timestamp of the last reply (or registration).
    pub last_received: i64,
    /// Consecutive scans the connection has been silent past the timeout.
    pub missed_count: u32,
    /// Last measured round-trip time in milliseconds.
    pub rtt_ms: i64,
    pub is_alive: bool,
}

type DisconnectHook = Box<dyn Fn(ConnectionId) + Send + Sync>;

/// Supervises liveness of tracked connections.
pub struct HeartbeatMonitor {
    tracked: RwLock<HashMap<ConnectionId, HeartbeatStatus>>,
    config: RwLock<HeartbeatConfig>,
    registry: Arc<ConnectionRegistry>,
    on_dead: DisconnectHook,
    probe_id: AtomicU32,
    metrics: Arc<Metrics>,
}

impl HeartbeatMonitor {
    pub fn new<F>(
        config: HeartbeatConfig,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<Metrics>,
        on_dead: F,
    ) -> Self
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        Self {
            tracked: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            registry,
            on_dead: Box::new(on_dead),
            probe_id: AtomicU32::new(1),
            metrics,
        }
    }

    /// Register a connection for probing. Symmetric with the registry's add.
    pub fn track(&self, id: ConnectionId) {
        if let Ok(mut tracked) = self.tracked.write() {
            tracked.insert(
                id,
                HeartbeatStatus {
                    last_sent: 0,
                    last_received: time::unix_ms(),
                    missed_count: 0,
                    rtt_ms: 0,
                    is_alive: true,
                },
            );
            debug!(connection_id = id, "Heartbeat tracking started");
        }
    }

    /// Deregister a connection. No-op if untracked.
    pub fn untrack(&self, id: ConnectionId) {
        if let Ok(mut tracked) = self.tracked.write() {
            if tracked.remove(&id).is_some() {
                debug!(connection_id = id, "Heartbeat tracking stopped");
            }
        }
    }

    pub fn status(&self, id: ConnectionId) -> Option<HeartbeatStatus> {
        self.tracked.read().ok()?.get(&id).copied()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Record a probe reply.
    ///
    /// Resets the missed count, marks the connection alive, and measures the
    /// round trip against the last probe. Returns `false` (a no-op, not an
    /// error) when the connection is no longer tracked; replies can race an
    /// eviction.
    pub fn record_reply(&self, id: ConnectionId) -> bool {
        let Ok(mut tracked) = self.tracked.write() else {
            return false;
        };
        let Some(status) = tracked.get_mut(&id) else {
            return false;
        };

        let now = time::unix_ms();
        if status.last_sent > 0 {
            status.rtt_ms = now.saturating_sub(status.last_sent);
        }
        status.last_received = now;
        status.missed_count = 0;
        status.is_alive = true;
        self.metrics.heartbeat_reply();
        debug!(connection_id = id, rtt_ms = status.rtt_ms, "Heartbeat reply");
        true
    }

    /// Swap the supervision parameters. Takes effect on the next tick.
    pub fn reconfigure(&self, config: HeartbeatConfig) {
        if let Ok(mut current) = self.config.write() {
            info!(
                interval_ms = config.interval.as_millis() as u64,
                timeout_ms = config.timeout.as_millis() as u64,
                max_missed = config.max_missed,
                "Heartbeat reconfigured"
            );
            *current = config;
        }
    }

    pub fn config(&self) -> HeartbeatConfig {
        self.config
            .read()
            .map(|c| *c)
            .unwrap_or_default()
    }

    /// One probe pass over all tracked connections.
    ///
    /// Returns the ids evicted this pass. Exposed separately from the loop so
    /// tests can drive scans deterministically.
    pub fn scan(&self) -> Vec<ConnectionId> {
        let config = self.config();
        let now = time::unix_ms();

        let mut probes = Vec::new();
        let mut dead = Vec::new();

        // Decide under the lock, act after releasing it: probe sends and the
        // disconnect hook must not run while the map is held.
        if let Ok(mut tracked) = self.tracked.write() {
            for (&id, status) in tracked.iter_mut() {
                if time::is_stale(now, status.last_received, config.timeout) {
                    status.missed_count += 1;
                    status.is_alive = false;
                    if status.missed_count >= config.max_missed {
                        dead.push(id);
                        continue;
                    }
                }
                status.last_sent = now;
                probes.push(id);
            }
            for id in &dead {
                tracked.remove(id);
            }
        }

        for id in probes {
            self.metrics.heartbeat_probe();
            let probe = Message::heartbeat_ping(self.probe_id.fetch_add(1, Ordering::Relaxed));
            if let Err(e) = self.registry.send_to(id, probe) {
                debug!(connection_id = id, error = %e, "Heartbeat probe not delivered");
            }
        }

        for &id in &dead {
            self.metrics.heartbeat_eviction();
            warn!(
                connection_id = id,
                max_missed = config.max_missed,
                "Connection declared dead by heartbeat monitor"
            );
            self.registry.remove(id);
            (self.on_dead)(id);
        }

        dead
    }

    /// Spawn the probe loop. Exits promptly when `shutdown_rx` receives a
    /// value or closes.
    pub fn spawn(self: &Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                // Re-read each iteration so reconfigure() takes effect.
                let interval = monitor.config().interval;
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Heartbeat monitor shutting down");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {
                        monitor.scan();
                    }
                }
            }
        })
    }
}
