//! # TCP Server Loop
//!
//! Framed accept loop with graceful shutdown.
//!
//! One lightweight task per connection runs the blocking read loop and feeds
//! decoded messages into dispatch; a second task per connection drains the
//! bounded outbound queue into the socket, decoupling write latency from read
//! latency. Messages from a single connection are dispatched in the order
//! they are read; there is no ordering guarantee across connections.
//!
//! On shutdown, per-connection loops are signalled and the server waits (with
//! a timeout) for them to drain before returning.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::core::codec::FrameCodec;
use crate::core::header::HEADER_LEN;
use crate::error::Result;
use crate::service::server::GameServer;

/// Accept connections until `shutdown_rx` yields, then drain.
pub async fn serve(
    listener: TcpListener,
    server: Arc<GameServer>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let (conn_shutdown_tx, _) = broadcast::channel::<()>(1);
    let max_connections = server.config().server.max_connections;
    let shutdown_timeout = server.config().server.shutdown_timeout;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Waiting for connections to close...");
                let _ = conn_shutdown_tx.send(());

                let timeout = tokio::time::sleep(shutdown_timeout);
                tokio::pin!(timeout);

                loop {
                    tokio::select! {
                        _ = &mut timeout => {
                            warn!("Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {
                            let connections = server.registry().len();
                            if connections == 0 {
                                info!("All connections closed, shutting down");
                                break;
                            }
                            debug!(connections, "Waiting for connections to close");
                        }
                    }
                }

                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        if server.registry().len() >= max_connections {
                            warn!(peer = %peer, "Connection limit reached, rejecting");
                            drop(stream);
                            continue;
                        }

                        let server = Arc::clone(&server);
                        let conn_shutdown = conn_shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(server, stream, peer, conn_shutdown).await {
                                debug!(peer = %peer, error = %e, "Connection terminated");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

/// Drive one connection: register it, run the read loop, tear down.
///
/// Frame-level decode failures and capacity failures are connection-fatal and
/// close the socket without a response; message-level failures are answered
/// inside dispatch and the loop continues.
async fn handle_connection(
    server: Arc<GameServer>,
    stream: TcpStream,
    peer: std::net::SocketAddr,
    mut conn_shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let framed = Framed::new(
        stream,
        FrameCodec::new(server.config().transport.max_frame_size),
    );
    let (mut sink, mut frames) = framed.split();

    let (outbound_tx, mut outbound_rx) =
        mpsc::channel(server.config().server.backpressure_limit);
    let conn = server.registry().register(peer, outbound_tx)?;
    let session = server.sessions().create_session(conn.id())?;
    server.sessions().mark_connected(&session.id)?;
    server.heartbeat().track(conn.id());

    // Writer task: sole consumer of the outbound queue. Exits when every
    // sender is gone, i.e. once the connection leaves the registry and the
    // read loop drops its handle.
    let conn_id = conn.id();
    let writer_metrics = server.metrics();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let frame_len = (HEADER_LEN + msg.payload.len()) as u64;
            if let Err(e) = sink.send(msg).await {
                debug!(connection_id = conn_id, error = %e, "Writer stopped");
                break;
            }
            writer_metrics.message_sent(frame_len);
        }
        let _ = sink.close().await;
    });

    let session_id = session.id.clone();
    let result = loop {
        tokio::select! {
            _ = conn_shutdown.recv() => break Ok(()),
            // Registry-side removal (takeover, cleanup, heartbeat eviction).
            _ = conn.closed() => break Ok(()),
            frame = frames.next() => match frame {
                // Peer closed the stream.
                None => break Ok(()),
                Some(Ok(msg)) => {
                    if let Err(e) = server.handle_message(&conn, &session_id, msg) {
                        if e.is_connection_fatal() {
                            break Err(e);
                        }
                        warn!(connection_id = conn.id(), error = %e, "Message dispatch failed");
                    }
                }
                Some(Err(e)) => {
                    // The peer cannot be trusted to parse a response; close
                    // without one.
                    server.metrics().protocol_error();
                    break Err(e);
                }
            }
        }
    };

    server.heartbeat().untrack(conn.id());
    server.registry().remove(conn.id());
    drop(conn);
    let _ = writer.await;
    result
}
