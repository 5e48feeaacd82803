//! Observability and Metrics
//!
//! Thread-safe metrics collection for monitoring protocol health.
//!
//! Uses atomic counters so recording never blocks the hot path. There is no
//! global instance: an `Arc<Metrics>` is injected into each component's
//! constructor, which also makes it trivial to assert on counters in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for the protocol core.
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Total sessions created
    pub sessions_created: AtomicU64,
    /// Total sessions removed
    pub sessions_removed: AtomicU64,
    /// Forced session takeovers (last login wins)
    pub session_takeovers: AtomicU64,
    /// Sessions removed by the idle sweep
    pub idle_sweep_removed: AtomicU64,
    /// Total messages received
    pub messages_received: AtomicU64,
    /// Total messages sent
    pub messages_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Broadcast fan-out attempts
    pub broadcasts_total: AtomicU64,
    /// Heartbeat probes sent
    pub heartbeat_probes: AtomicU64,
    /// Heartbeat replies received
    pub heartbeat_replies: AtomicU64,
    /// Connections evicted by the heartbeat monitor
    pub heartbeat_evictions: AtomicU64,
    /// Messages routed to an unregistered type
    pub routing_unhandled: AtomicU64,
    /// Handler invocations that returned an error
    pub handler_errors: AtomicU64,
    /// Frame- and message-level protocol errors
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_removed: AtomicU64::new(0),
            session_takeovers: AtomicU64::new(0),
            idle_sweep_removed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            broadcasts_total: AtomicU64::new(0),
            heartbeat_probes: AtomicU64::new(0),
            heartbeat_replies: AtomicU64::new(0),
            heartbeat_evictions: AtomicU64::new(0),
            routing_unhandled: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_removed(&self) {
        self.sessions_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_takeover(&self) {
        self.session_takeovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idle_swept(&self, count: u64) {
        self.idle_sweep_removed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a message received
    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a message sent
    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn broadcast(&self) {
        self.broadcasts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_probe(&self) {
        self.heartbeat_probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_reply(&self) {
        self.heartbeat_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_eviction(&self) {
        self.heartbeat_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unhandled_message(&self) {
        self.routing_unhandled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_removed: self.sessions_removed.load(Ordering::Relaxed),
            session_takeovers: self.session_takeovers.load(Ordering::Relaxed),
            idle_sweep_removed: self.idle_sweep_removed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            broadcasts_total: self.broadcasts_total.load(Ordering::Relaxed),
            heartbeat_probes: self.heartbeat_probes.load(Ordering::Relaxed),
            heartbeat_replies: self.heartbeat_replies.load(Ordering::Relaxed),
            heartbeat_evictions: self.heartbeat_evictions.load(Ordering::Relaxed),
            routing_unhandled: self.routing_unhandled.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            sessions_created = snapshot.sessions_created,
            sessions_removed = snapshot.sessions_removed,
            session_takeovers = snapshot.session_takeovers,
            idle_sweep_removed = snapshot.idle_sweep_removed,
            messages_received = snapshot.messages_received,
            messages_sent = snapshot.messages_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            heartbeat_probes = snapshot.heartbeat_probes,
            heartbeat_replies = snapshot.heartbeat_replies,
            heartbeat_evictions = snapshot.heartbeat_evictions,
            routing_unhandled = snapshot.routing_unhandled,
            handler_errors = snapshot.handler_errors,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub sessions_created: u64,
    pub sessions_removed: u64,
    pub session_takeovers: u64,
    pub idle_sweep_removed: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub broadcasts_total: u64,
    pub heartbeat_probes: u64,
    pub heartbeat_replies: u64,
    pub heartbeat_evictions: u64,
    pub routing_unhandled: u64,
    pub handler_errors: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration, logged on drop.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.connection_established();
        m.connection_established();
        m.connection_closed();
        m.message_received(128);
        m.message_sent(64);
        m.session_takeover();

        let snap = m.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.bytes_received, 128);
        assert_eq!(snap.bytes_sent, 64);
        assert_eq!(snap.session_takeovers, 1);
    }
}
