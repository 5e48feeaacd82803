#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Concurrency tests: shared components hammered from many tasks at once.
//!
//! These verify the locking discipline rather than throughput: invariants
//! must hold under contention and nothing may deadlock or panic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use gamewire::core::codec::{self, DEFAULT_MAX_FRAME_SIZE};
use gamewire::core::message::Message;
use gamewire::protocol::router::Router;
use gamewire::protocol::session::{SessionContext, SessionManager, SessionState};
use gamewire::transport::registry::ConnectionRegistry;
use gamewire::utils::metrics::Metrics;

fn addr() -> SocketAddr {
    "127.0.0.1:4000".parse().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_codec_roundtrips() {
    let mut tasks = JoinSet::new();

    for task in 0..8u32 {
        tasks.spawn(async move {
            for i in 0..500u32 {
                let id = task * 10_000 + i + 1;
                let payload = Bytes::from(format!("payload-{id}"));
                let msg = Message::request(2_000 + (i % 100), id, payload.clone());

                let bytes = codec::encode(&msg.header, &msg.payload);
                let decoded = codec::decode(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap();
                assert_eq!(decoded.header.message_id, id);
                assert_eq!(decoded.payload, payload);
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.expect("codec task panicked");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_logins_keep_single_player_binding() {
    let mgr = Arc::new(SessionManager::new(
        Duration::from_secs(60),
        Arc::new(Metrics::new()),
    ));

    // 32 simultaneous logins as the same player, racing each other's
    // takeovers. Whatever interleaving wins, exactly one session may hold the
    // player afterwards.
    let mut tasks = JoinSet::new();
    for conn in 1..=32u64 {
        let mgr = Arc::clone(&mgr);
        tasks.spawn(async move {
            let session = mgr.create_session(conn).unwrap();
            mgr.bind_player(&session.id, 7).unwrap();
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.expect("login task panicked");
    }

    let bound = mgr.get_by_player(7).expect("player must stay bound");
    assert_eq!(bound.player_id, Some(7));
    assert_eq!(bound.state, SessionState::Authenticated);

    let holders = mgr
        .all_sessions()
        .into_iter()
        .filter(|s| s.player_id == Some(7))
        .count();
    assert_eq!(holders, 1, "player bound to more than one session");

    // Every loser was moved to Disconnecting; the sweep reaps them all.
    let report = mgr.sweep(Duration::from_secs(10));
    assert_eq!(report.removed.len(), 31);
    assert_eq!(mgr.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_session_churn() {
    let mgr = Arc::new(SessionManager::new(
        Duration::from_secs(60),
        Arc::new(Metrics::new()),
    ));

    let mut tasks = JoinSet::new();
    for worker in 0..8u64 {
        let mgr = Arc::clone(&mgr);
        tasks.spawn(async move {
            for i in 0..200u64 {
                let conn = worker * 1_000 + i;
                let session = mgr.create_session(conn).unwrap();
                mgr.bind_player(&session.id, conn).unwrap();
                mgr.update_activity(&session.id).unwrap();
                assert!(mgr.remove(&session.id));
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.expect("churn task panicked");
    }

    assert!(mgr.is_empty());
    // Removal must have cleared every player index entry.
    for conn in 0..8_000u64 {
        assert!(mgr.get_by_player(conn).is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_registry_broadcast_and_removal() {
    let reg = Arc::new(ConnectionRegistry::new(Arc::new(Metrics::new())));

    // Half the connections will be removed while broadcasts are in flight.
    let mut receivers = Vec::new();
    let mut victim_ids = Vec::new();
    for i in 0..64 {
        let (tx, rx) = mpsc::channel(1_024);
        let conn = reg.register(addr(), tx).unwrap();
        if i % 2 == 0 {
            victim_ids.push(conn.id());
        }
        receivers.push(rx);
    }

    let mut tasks = JoinSet::new();

    let broadcaster = Arc::clone(&reg);
    tasks.spawn(async move {
        for i in 1..=100u32 {
            broadcaster.broadcast(&Message::request(5_001, i, Bytes::new()));
            tokio::task::yield_now().await;
        }
    });

    let remover = Arc::clone(&reg);
    tasks.spawn(async move {
        for id in victim_ids {
            remover.remove(id);
            tokio::task::yield_now().await;
        }
    });

    while let Some(res) = tasks.join_next().await {
        res.expect("registry task panicked");
    }

    assert_eq!(reg.len(), 32);
    // Survivors received every broadcast; removed connections stop receiving
    // after their removal but the broadcast loop never failed.
    let last = reg.broadcast(&Message::request(5_001, 999, Bytes::new()));
    assert_eq!(last, 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_handler_registration_and_dispatch() {
    let router = Arc::new(Router::new(Arc::new(Metrics::new())));

    let ctx = SessionContext {
        session_id: "s-conc".into(),
        connection_id: 1,
        player_id: Some(3),
        state: SessionState::Active,
    };

    // Register a distinct handler per type from many tasks...
    let mut tasks = JoinSet::new();
    for t in 0..64u32 {
        let router = Arc::clone(&router);
        tasks.spawn(async move {
            let message_type = 6_000 + t;
            router
                .register(message_type, move |_: &SessionContext, msg: &Message| {
                    Ok(Some(msg.reply(Bytes::from(message_type.to_be_bytes().to_vec()))))
                })
                .unwrap();
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.expect("registration task panicked");
    }

    // ...then dispatch against all of them concurrently.
    let mut tasks = JoinSet::new();
    for t in 0..64u32 {
        let router = Arc::clone(&router);
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let message_type = 6_000 + t;
            let msg = Message::request(message_type, t + 1, Bytes::new());
            let resp = router.route(&ctx, &msg).unwrap().unwrap();
            assert_eq!(resp.payload, Bytes::from(message_type.to_be_bytes().to_vec()));
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.expect("dispatch task panicked");
    }
}
