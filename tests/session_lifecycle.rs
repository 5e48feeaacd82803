#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end lifecycle tests over real TCP sockets.
//!
//! Each test binds an ephemeral port, runs a full `GameServer`, and drives it
//! with a framed client: authentication, business dispatch, error responses,
//! forced takeover, and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use gamewire::config::NetworkConfig;
use gamewire::core::codec::FrameCodec;
use gamewire::core::header::{msg_type, Flags};
use gamewire::core::message::{
    encode_payload, error_code, AuthRequest, AuthResponse, ErrorBody, Message,
};
use gamewire::error::Result;
use gamewire::service::{GameServer, TokenTableAuthenticator};
use gamewire::protocol::session::SessionContext;

const ECHO_TYPE: u32 = 1_001;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

type Client = Framed<TcpStream, FrameCodec>;

struct TestServer {
    addr: SocketAddr,
    server: Arc<GameServer>,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

async fn start_server() -> TestServer {
    let mut config = NetworkConfig::default();
    config.server.shutdown_timeout = Duration::from_secs(2);

    let auth = TokenTableAuthenticator::new()
        .with_token("tok-alice", 101)
        .with_token("tok-bob", 102);
    let server = GameServer::new(config, auth).expect("server construction");

    server
        .register_handler(ECHO_TYPE, |_ctx: &SessionContext, msg: &Message| {
            Ok(Some(msg.reply(msg.payload.clone())))
        })
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown, shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(Arc::clone(&server).serve(listener, shutdown_rx));

    TestServer {
        addr,
        server,
        shutdown,
        handle,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).await.expect("connect");
    Framed::new(stream, FrameCodec::default())
}

async fn read_frame(client: &mut Client) -> Message {
    timeout(READ_TIMEOUT, client.next())
        .await
        .expect("read timed out")
        .expect("stream closed")
        .expect("decode failed")
}

async fn authenticate(client: &mut Client, token: &str, message_id: u32) -> AuthResponse {
    let payload = encode_payload(&AuthRequest {
        token: token.to_string(),
    })
    .unwrap();
    client
        .send(Message::request(msg_type::SYS_AUTH, message_id, payload))
        .await
        .unwrap();

    let reply = read_frame(client).await;
    assert_eq!(reply.header.message_type, msg_type::SYS_AUTH_OK);
    assert_eq!(reply.header.message_id, message_id);
    assert!(reply.header.flags.contains(Flags::RESPONSE));
    reply.decode_payload().unwrap()
}

#[tokio::test]
async fn auth_then_echo_roundtrip() {
    let ts = start_server().await;
    let mut client = connect(ts.addr).await;

    let auth = authenticate(&mut client, "tok-alice", 1).await;
    assert_eq!(auth.player_id, 101);
    assert!(!auth.session_id.is_empty());

    client
        .send(Message::request(
            ECHO_TYPE,
            2,
            Bytes::from_static(b"move-north"),
        ))
        .await
        .unwrap();

    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_id, 2);
    assert!(reply.header.flags.contains(Flags::RESPONSE));
    assert!(!reply.is_error());
    assert_eq!(reply.payload, Bytes::from_static(b"move-north"));

    // Server-side view: one session, authenticated as the right player.
    let session = ts.server.sessions().get_by_player(101).expect("session");
    assert_eq!(session.player_id, Some(101));

    let _ = ts.shutdown.send(()).await;
    ts.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn bad_token_rejected_but_connection_survives() {
    let ts = start_server().await;
    let mut client = connect(ts.addr).await;

    let payload = encode_payload(&AuthRequest {
        token: "tok-wrong".into(),
    })
    .unwrap();
    client
        .send(Message::request(msg_type::SYS_AUTH, 1, payload))
        .await
        .unwrap();

    let reply = read_frame(&mut client).await;
    assert!(reply.is_error());
    assert_eq!(reply.header.message_id, 1);
    let body: ErrorBody = reply.decode_payload().unwrap();
    assert_eq!(body.code, error_code::AUTH_FAILED);

    // Same connection can retry with a good token.
    let auth = authenticate(&mut client, "tok-alice", 2).await;
    assert_eq!(auth.player_id, 101);

    let _ = ts.shutdown.send(()).await;
    ts.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unhandled_type_answered_with_correlated_error() {
    let ts = start_server().await;
    let mut client = connect(ts.addr).await;
    authenticate(&mut client, "tok-alice", 1).await;

    client
        .send(Message::request(8_888, 42, Bytes::new()))
        .await
        .unwrap();

    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_id, 42);
    assert!(reply.header.flags.contains(Flags::ERROR));
    let body: ErrorBody = reply.decode_payload().unwrap();
    assert_eq!(body.code, error_code::UNHANDLED_MESSAGE);

    let _ = ts.shutdown.send(()).await;
    ts.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn invalid_header_answered_without_dropping_connection() {
    let ts = start_server().await;
    let mut client = connect(ts.addr).await;
    authenticate(&mut client, "tok-alice", 1).await;

    // Zero timestamp fails header validation during dispatch.
    let mut bad = Message::request(ECHO_TYPE, 7, Bytes::from_static(b"x"));
    bad.header.timestamp = 0;
    client.send(bad).await.unwrap();

    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_id, 7);
    assert!(reply.is_error());
    let body: ErrorBody = reply.decode_payload().unwrap();
    assert_eq!(body.code, error_code::INVALID_MESSAGE);

    // The connection is still serviceable.
    client
        .send(Message::request(ECHO_TYPE, 8, Bytes::from_static(b"ok")))
        .await
        .unwrap();
    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_id, 8);
    assert_eq!(reply.payload, Bytes::from_static(b"ok"));

    let _ = ts.shutdown.send(()).await;
    ts.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn client_ping_gets_pong() {
    let ts = start_server().await;
    let mut client = connect(ts.addr).await;

    client.send(Message::heartbeat_ping(3)).await.unwrap();
    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_type, msg_type::SYS_HEARTBEAT_PONG);
    assert_eq!(reply.header.message_id, 3);

    let _ = ts.shutdown.send(()).await;
    ts.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn duplicate_login_evicts_first_connection() {
    let ts = start_server().await;

    let mut first = connect(ts.addr).await;
    authenticate(&mut first, "tok-alice", 1).await;

    // Second login as the same player: last login wins.
    let mut second = connect(ts.addr).await;
    let auth = authenticate(&mut second, "tok-alice", 1).await;
    assert_eq!(auth.player_id, 101);

    // The first client is told why it is going away. The notice is
    // unsolicited and must not borrow the new login's correlation id.
    let notice = read_frame(&mut first).await;
    assert_eq!(notice.header.message_type, msg_type::SYS_SESSION_EVICTED);
    assert_eq!(notice.header.message_id, 0);

    // ...then its stream closes.
    let eof = timeout(READ_TIMEOUT, first.next()).await.expect("eviction close");
    assert!(eof.is_none(), "expected EOF after eviction notice");

    // The survivor still works, and exactly one session holds the player.
    second
        .send(Message::request(ECHO_TYPE, 9, Bytes::from_static(b"alive")))
        .await
        .unwrap();
    let reply = read_frame(&mut second).await;
    assert_eq!(reply.payload, Bytes::from_static(b"alive"));

    let holders = ts
        .server
        .sessions()
        .all_sessions()
        .into_iter()
        .filter(|s| s.player_id == Some(101))
        .count();
    assert_eq!(holders, 1);

    let _ = ts.shutdown.send(()).await;
    ts.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn peer_disconnect_cleans_up_server_state() {
    let ts = start_server().await;

    let mut client = connect(ts.addr).await;
    authenticate(&mut client, "tok-bob", 1).await;
    assert_eq!(ts.server.registry().len(), 1);

    drop(client);

    // Connection teardown cascades into the session layer.
    timeout(READ_TIMEOUT, async {
        while ts.server.registry().len() > 0 || !ts.server.sessions().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cleanup after peer disconnect");

    assert!(ts.server.sessions().get_by_player(102).is_none());

    let _ = ts.shutdown.send(()).await;
    ts.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn graceful_shutdown_closes_live_connections() {
    let ts = start_server().await;

    let mut client = connect(ts.addr).await;
    authenticate(&mut client, "tok-alice", 1).await;

    ts.shutdown.send(()).await.unwrap();
    ts.handle.await.unwrap().unwrap();

    // The client observes EOF once the server drains.
    let eof = timeout(READ_TIMEOUT, client.next()).await.expect("close on shutdown");
    assert!(eof.is_none());
    assert_eq!(ts.server.registry().len(), 0);
}
