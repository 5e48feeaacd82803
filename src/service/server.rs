//! # Game Server Composition
//!
//! Wires the codec, registry, session manager, heartbeat monitor, and router
//! into one running server, and owns message dispatch for a connection.
//!
//! Cross-component consistency is maintained by explicit callbacks at removal
//! points, never by shared locks: removing a connection from the registry
//! unbinds its sessions through the remove hook, and a heartbeat eviction
//! funnels through the same registry removal. A message racing a removal
//! surfaces as a recoverable `ConnectionClosed`.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::core::header::{msg_type, HEADER_LEN};
use crate::core::message::{error_code, AuthRequest, AuthResponse, Message};
use crate::error::{ProtocolError, Result};
use crate::protocol::heartbeat::HeartbeatMonitor;
use crate::protocol::router::{Handler, Router};
use crate::protocol::session::{SessionId, SessionManager};
use crate::service::auth::Authenticator;
use crate::transport::registry::{Connection, ConnectionRegistry};
use crate::transport::tcp;
use crate::utils::metrics::Metrics;

/// The assembled protocol core.
pub struct GameServer {
    config: NetworkConfig,
    metrics: Arc<Metrics>,
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionManager>,
    heartbeat: Arc<HeartbeatMonitor>,
    router: Router,
    authenticator: Box<dyn Authenticator>,
}

impl GameServer {
    /// Build and wire all components. Fails on invalid configuration.
    pub fn new<A>(config: NetworkConfig, authenticator: A) -> Result<Arc<Self>>
    where
        A: Authenticator + 'static,
    {
        config.validate_strict()?;

        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&metrics)));
        let sessions = Arc::new(SessionManager::new(
            config.session.idle_timeout,
            Arc::clone(&metrics),
        ));

        // Registry removal cascades into the session layer so no session ever
        // references a connection the registry no longer has.
        let sessions_for_hook = Arc::clone(&sessions);
        registry.set_remove_hook(move |connection_id| {
            sessions_for_hook.remove_by_connection(connection_id);
        })?;

        let heartbeat = Arc::new(HeartbeatMonitor::new(
            config.heartbeat,
            Arc::clone(&registry),
            Arc::clone(&metrics),
            |connection_id| {
                debug!(connection_id, "Heartbeat eviction completed");
            },
        ));

        let router = Router::new(Arc::clone(&metrics));

        Ok(Arc::new(Self {
            config,
            metrics,
            registry,
            sessions,
            heartbeat,
            router,
            authenticator: Box::new(authenticator),
        }))
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    /// Register a business handler for a message type (strict, register-once).
    pub fn register_handler<H>(&self, message_type: u32, handler: H) -> Result<()>
    where
        H: Handler + 'static,
    {
        self.router.register(message_type, handler)
    }

    /// Fan a message out to every live connection.
    pub fn broadcast(&self, msg: &Message) -> usize {
        self.registry.broadcast(msg)
    }

    /// Fan a message out to one connection group.
    pub fn broadcast_to_group(&self, group: &str, msg: &Message) -> usize {
        self.registry.broadcast_to_group(group, msg)
    }

    /// Run the server until ctrl-c.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });
        self.run_with_shutdown(shutdown_rx).await
    }

    /// Run the server until `shutdown_rx` yields.
    ///
    /// Spawns the heartbeat probe loop, the session idle sweep, and the
    /// registry cleanup pass, then serves the configured listen address.
    /// All background workers exit promptly on shutdown.
    pub async fn run_with_shutdown(
        self: Arc<Self>,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.address).await?;
        info!(address = %self.config.server.address, "Listening");
        self.serve(listener, shutdown_rx).await
    }

    /// Serve on an already-bound listener (lets tests bind port 0).
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut background = BackgroundTasks::default();

        let (hb_tx, hb_rx) = mpsc::channel::<()>(1);
        background.push(hb_tx, self.heartbeat.spawn(hb_rx));

        let (sweep_tx, sweep_rx) = mpsc::channel::<()>(1);
        background.push(
            sweep_tx,
            self.sessions.spawn_idle_sweep(
                self.config.session.sweep_interval,
                self.config.session.disconnect_grace,
                sweep_rx,
            ),
        );

        let (cleanup_tx, cleanup_rx) = mpsc::channel::<()>(1);
        background.push(cleanup_tx, self.spawn_registry_cleanup(cleanup_rx));

        let result = tcp::serve(listener, Arc::clone(&self), shutdown_rx).await;
        background.stop().await;
        result
    }

    fn spawn_registry_cleanup(&self, mut shutdown_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let timeout = self.config.server.connection_timeout;
        let interval = self.config.server.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Registry cleanup shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        registry.cleanup_inactive(timeout);
                    }
                }
            }
        })
    }

    /// Dispatch one decoded inbound message for a connection.
    ///
    /// Heartbeat and auth frames are handled here; everything else goes
    /// through the router. Message-level failures are answered with a
    /// correlated error response and return `Ok`; only connection-fatal
    /// errors propagate.
    pub fn handle_message(&self, conn: &Connection, session_id: &SessionId, msg: Message) -> Result<()> {
        self.metrics
            .message_received((HEADER_LEN + msg.payload.len()) as u64);
        conn.touch();
        // Session may already be gone if a removal raced this message.
        let _ = self.sessions.update_activity(session_id);

        match msg.header.message_type {
            msg_type::SYS_HEARTBEAT_PONG => {
                self.heartbeat.record_reply(conn.id());
                Ok(())
            }
            msg_type::SYS_HEARTBEAT_PING => conn.send(Message::heartbeat_pong(&msg)),
            msg_type::SYS_AUTH => self.handle_auth(conn, session_id, &msg),
            _ => self.route_business(conn, session_id, &msg),
        }
    }

    fn route_business(&self, conn: &Connection, session_id: &SessionId, msg: &Message) -> Result<()> {
        let ctx = match self.sessions.context_for(session_id) {
            Ok(ctx) => ctx,
            // Connection gone mid-flight: recoverable, drop the message.
            Err(ProtocolError::SessionNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        match self.router.route(&ctx, msg) {
            Ok(Some(response)) => conn.send(response),
            Ok(None) => Ok(()),
            Err(ProtocolError::InvalidMessage(reason)) => {
                conn.send(msg.error_reply(error_code::INVALID_MESSAGE, reason)?)
            }
            Err(e) if e.is_connection_fatal() => Err(e),
            Err(e) => {
                // Handler-level failure: already logged by the router with
                // full context; answer the client and keep the connection.
                conn.send(msg.error_reply(error_code::INTERNAL, e.to_string())?)
            }
        }
    }

    fn handle_auth(&self, conn: &Connection, session_id: &SessionId, msg: &Message) -> Result<()> {
        let request: AuthRequest = match msg.decode_payload() {
            Ok(req) => req,
            Err(e) => {
                return conn.send(msg.error_reply(
                    error_code::INVALID_MESSAGE,
                    format!("malformed auth payload: {e}"),
                )?);
            }
        };

        let player_id = match self.authenticator.verify(&request.token) {
            Ok(pid) => pid,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Authentication rejected");
                return conn.send(msg.error_reply(error_code::AUTH_FAILED, e.to_string())?);
            }
        };

        let evicted = self.sessions.bind_player(session_id, player_id)?;
        if let Some(old) = evicted {
            // Last login wins: tell the old client why it is going away, then
            // tear its connection down. The notice is unsolicited, so it
            // carries no correlation id.
            let notice =
                Message::request(msg_type::SYS_SESSION_EVICTED, 0, bytes::Bytes::new());
            if let Err(e) = self.registry.send_to(old.connection_id, notice) {
                debug!(
                    connection_id = old.connection_id,
                    error = %e,
                    "Could not notify evicted session"
                );
            }
            self.registry.remove(old.connection_id);
        }

        let body = crate::core::message::encode_payload(&AuthResponse {
            player_id,
            session_id: session_id.clone(),
        })?;
        let mut reply = msg.reply(body);
        reply.header.message_type = msg_type::SYS_AUTH_OK;
        reply.header.player_id = player_id;
        conn.send(reply)
    }
}

/// Shutdown senders and handles for the background workers.
#[derive(Default)]
struct BackgroundTasks {
    stoppers: Vec<mpsc::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn push(&mut self, stopper: mpsc::Sender<()>, handle: JoinHandle<()>) {
        self.stoppers.push(stopper);
        self.handles.push(handle);
    }

    async fn stop(self) {
        for stopper in &self.stoppers {
            let _ = stopper.send(()).await;
        }
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
