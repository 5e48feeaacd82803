//! # Message Router
//!
//! Maps numeric message types to registered business handlers and dispatches
//! decoded messages.
//!
//! ## Dispatch Contract
//! - Headers are validated before dispatch; violations are message-level
//!   errors (connection stays open, client gets a correlated error response).
//! - An unregistered message type is never silently dropped: the router
//!   synthesizes an `UNHANDLED_MESSAGE` error response correlated by message
//!   id, and routing succeeds.
//! - A handler error is logged with full context (session id, player id,
//!   message type and id) and propagated to the caller; it does not by itself
//!   close the connection.
//!
//! ## Registration Policy
//! `register` is strict: a second registration for the same type fails with
//! `HandlerExists`. The upstream behavior of silently letting the last
//! registration win is preserved behind `register_or_replace` for callers
//! that depend on it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use crate::core::message::{error_code, Message};
use crate::error::{ProtocolError, Result};
use crate::protocol::session::SessionContext;
use crate::utils::metrics::Metrics;

/// Business logic plug-in point, one per message type.
///
/// Handlers may return a response message to be written back on the session's
/// connection, or `None` for fire-and-forget messages.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &SessionContext, msg: &Message) -> Result<Option<Message>>;
}

impl<F> Handler for F
where
    F: Fn(&SessionContext, &Message) -> Result<Option<Message>> + Send + Sync,
{
    fn handle(&self, ctx: &SessionContext, msg: &Message) -> Result<Option<Message>> {
        self(ctx, msg)
    }
}

/// Message-type dispatch table.
///
/// Handlers are stored behind `Arc` so dispatch can clone the handler and
/// release the table lock before invoking it: no lock is ever held across a
/// handler call, and a handler may itself (re)register handlers.
pub struct Router {
    handlers: RwLock<HashMap<u32, Arc<dyn Handler>>>,
    metrics: Arc<Metrics>,
}

impl Router {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Register a handler for a message type.
    ///
    /// Fails with `HandlerExists` if the type already has a handler.
    pub fn register<H>(&self, message_type: u32, handler: H) -> Result<()>
    where
        H: Handler + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned("router handlers"))?;

        if handlers.contains_key(&message_type) {
            return Err(ProtocolError::HandlerExists(message_type));
        }
        handlers.insert(message_type, Arc::new(handler));
        Ok(())
    }

    /// Register a handler, replacing any existing one (last registration
    /// wins).
    pub fn register_or_replace<H>(&self, message_type: u32, handler: H) -> Result<()>
    where
        H: Handler + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned("router handlers"))?;

        if handlers.insert(message_type, Arc::new(handler)).is_some() {
            warn!(message_type, "Handler replaced for message type");
        }
        Ok(())
    }

    pub fn has_handler(&self, message_type: u32) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(&message_type))
            .unwrap_or(false)
    }

    /// Dispatch one decoded message for a session.
    ///
    /// Returns the response to write back, if any. Unknown message types
    /// yield `Ok(Some(error response))`: delivery of the correlated error is
    /// part of normal routing, not a failure. Header-validation failures
    /// return `Err(InvalidMessage)` and handler failures propagate after
    /// being logged; neither is connection-fatal.
    pub fn route(&self, ctx: &SessionContext, msg: &Message) -> Result<Option<Message>> {
        if let Err(e) = msg.header.validate() {
            self.metrics.protocol_error();
            return Err(e);
        }

        // Clone the handler out and release the lock before invoking: a
        // handler may register handlers of its own, and a slow handler must
        // not block registration or dispatch for other connections.
        let handler = {
            let handlers = self
                .handlers
                .read()
                .map_err(|_| ProtocolError::LockPoisoned("router handlers"))?;
            handlers.get(&msg.header.message_type).cloned()
        };

        let Some(handler) = handler else {
            self.metrics.unhandled_message();
            warn!(
                session_id = %ctx.session_id,
                message_type = msg.header.message_type,
                message_id = msg.header.message_id,
                "No handler registered, returning UNHANDLED_MESSAGE"
            );
            let reply = msg.error_reply(
                error_code::UNHANDLED_MESSAGE,
                format!("no handler for message type {}", msg.header.message_type),
            )?;
            return Ok(Some(reply));
        };

        match handler.handle(ctx, msg) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.metrics.handler_error();
                error!(
                    session_id = %ctx.session_id,
                    player_id = ctx.player_id.unwrap_or(0),
                    message_type = msg.header.message_type,
                    message_id = msg.header.message_id,
                    error = %e,
                    "Handler failed"
                );
                Err(e)
            }
        }
    }
}
