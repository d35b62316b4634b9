//! Integration tests driving `ConnectionPool` over real TCP sockets.

mod common;

use std::time::Duration;

use common::{Note, PATIENCE, Refuse, eventually, harness, local_config, next, serve};
use peerwire::{DisconnectReason, PoolError, message::AsAny};
use rstest::rstest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{sleep, timeout},
};

#[tokio::test]
async fn notes_travel_in_both_directions() {
    let mut server = harness(local_config());
    let mut client = harness(local_config());
    let addr = serve(&server.pool).await.to_string();

    client.pool.connect(&addr).await.expect("connect");
    assert_eq!(next(&mut client.connects).await, (addr.clone(), true));
    let (inbound_addr, solicited) = next(&mut server.connects).await;
    assert!(!solicited);

    client
        .pool
        .send_message(&addr, Note::from("hello"))
        .await
        .expect("send to server");
    let (ctx, text) = next(&mut server.notes).await;
    assert_eq!(text, "hello");
    assert_eq!(ctx.remote_addr(), inbound_addr);
    let info = server
        .pool
        .get_connection(&inbound_addr)
        .await
        .expect("pool open")
        .expect("inbound connection registered");
    assert_eq!(ctx.connection_id(), info.id);

    server
        .pool
        .send_message(ctx.remote_addr(), Note::from("welcome"))
        .await
        .expect("reply to client");
    let (ctx, text) = next(&mut client.notes).await;
    assert_eq!(text, "welcome");
    assert_eq!(ctx.remote_addr(), addr);
}

#[tokio::test]
async fn dialing_a_connected_address_is_a_no_op() {
    let mut server = harness(local_config());
    let client = harness(local_config());
    let addr = serve(&server.pool).await.to_string();

    client.pool.connect(&addr).await.expect("first connect");
    client.pool.connect(&addr).await.expect("second connect");
    next(&mut server.connects).await;

    assert_eq!(client.pool.size().await.expect("size"), 1);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.pool.size().await.expect("size"), 1);
}

#[tokio::test]
async fn dial_failure_is_reported() {
    let client = harness(local_config());
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local_addr").to_string();
    drop(listener);

    let err = client.pool.connect(&addr).await.unwrap_err();
    assert!(matches!(err, PoolError::Dial { .. }), "unexpected error: {err}");
    assert_eq!(client.pool.size().await.expect("size"), 0);
}

#[rstest]
#[case::length_below_prefix(&[2, 0, 0, 0, 0, 0], "invalid_message_length")]
#[case::length_above_maximum(&[0xFF, 0xFF, 0xFF, 0x7F, 0], "invalid_message_length")]
#[case::unknown_prefix(&[4, 0, 0, 0, b'Z', b'Z', b'Z', b'Z'], "unknown_message")]
#[case::malformed_body(&[6, 0, 0, 0, b'N', b'O', b'T', b'E', 9, 0], "malformed_message")]
#[tokio::test]
async fn protocol_violations_drop_the_peer(#[case] bytes: &[u8], #[case] label: &str) {
    let mut server = harness(local_config().max_message_length(1024));
    let addr = serve(&server.pool).await;

    let mut raw = TcpStream::connect(addr).await.expect("connect");
    let local = raw.local_addr().expect("local_addr").to_string();
    assert_eq!(next(&mut server.connects).await, (local.clone(), false));

    raw.write_all(bytes).await.expect("write frame");
    assert_eq!(next(&mut server.disconnects).await, (local, label));

    let mut buf = [0_u8; 16];
    let read = timeout(PATIENCE, raw.read(&mut buf))
        .await
        .expect("server closes socket");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(server.pool.size().await.expect("size"), 0);
}

#[tokio::test]
async fn handler_errors_drop_the_peer() {
    let mut server = harness(local_config());
    let mut client = harness(local_config());
    let addr = serve(&server.pool).await.to_string();

    client.pool.connect(&addr).await.expect("connect");
    let (inbound_addr, _) = next(&mut server.connects).await;
    client
        .pool
        .send_message(&addr, Refuse)
        .await
        .expect("queue refusal");

    assert_eq!(
        next(&mut server.disconnects).await,
        (inbound_addr, "handler")
    );
    let (dropped, _) = next(&mut client.disconnects).await;
    assert_eq!(dropped, addr);
    assert!(!client.pool.is_conn_exist(&addr).await.expect("pool open"));
}

#[tokio::test]
async fn requested_disconnect_is_reported_once() {
    let mut server = harness(local_config());
    let mut client = harness(local_config());
    let addr = serve(&server.pool).await.to_string();

    client.pool.connect(&addr).await.expect("connect");
    let (inbound_addr, _) = next(&mut server.connects).await;

    client
        .pool
        .disconnect(&addr, DisconnectReason::requested("bye"))
        .await
        .expect("disconnect");
    client
        .pool
        .disconnect(&addr, DisconnectReason::requested("again"))
        .await
        .expect("repeat disconnect");

    assert_eq!(
        next(&mut client.disconnects).await,
        (addr.clone(), "requested")
    );
    assert_eq!(
        next(&mut server.disconnects).await,
        (inbound_addr, "closed_by_peer")
    );
    sleep(Duration::from_millis(50)).await;
    assert!(client.disconnects.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_reaches_every_peer() {
    let mut server = harness(local_config());
    let mut first = harness(local_config());
    let mut second = harness(local_config());
    let addr = serve(&server.pool).await.to_string();

    first.pool.connect(&addr).await.expect("first connect");
    second.pool.connect(&addr).await.expect("second connect");
    next(&mut server.connects).await;
    next(&mut server.connects).await;

    let delivered = server
        .pool
        .broadcast_message(Note::from("all"))
        .await
        .expect("broadcast");
    assert_eq!(delivered, 2);
    assert_eq!(next(&mut first.notes).await.1, "all");
    assert_eq!(next(&mut second.notes).await.1, "all");
}

#[tokio::test]
async fn send_results_follow_each_write() {
    let server = harness(local_config());
    let client = harness(local_config());
    let addr = serve(&server.pool).await.to_string();
    let mut results = client
        .pool
        .take_send_results()
        .await
        .expect("pool open")
        .expect("results not yet taken");

    client.pool.connect(&addr).await.expect("connect");
    client
        .pool
        .send_message(&addr, Note::from("tracked"))
        .await
        .expect("send");

    let outcome = timeout(PATIENCE, results.recv())
        .await
        .expect("result within timeout")
        .expect("results channel open");
    assert_eq!(outcome.remote_addr, addr);
    assert!(outcome.result.is_ok());
    let note = (*outcome.message)
        .as_any()
        .downcast_ref::<Note>()
        .expect("published message is the note");
    assert_eq!(note.0, "tracked");
}

#[tokio::test]
async fn peers_beyond_the_limit_are_refused() {
    let mut server = harness(local_config().max_connections(1));
    let addr = serve(&server.pool).await;

    let _admitted = TcpStream::connect(addr).await.expect("first connect");
    next(&mut server.connects).await;

    let mut refused = TcpStream::connect(addr).await.expect("second connect");
    let mut buf = [0_u8; 1];
    let read = timeout(PATIENCE, refused.read(&mut buf))
        .await
        .expect("refused socket is closed");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(server.pool.size().await.expect("size"), 1);
}

#[tokio::test]
async fn shutdown_drops_peers_and_pool_can_serve_again() {
    let mut server = harness(local_config());
    let client = harness(local_config());
    let addr = serve(&server.pool).await.to_string();
    client.pool.connect(&addr).await.expect("connect");
    let (inbound_addr, _) = next(&mut server.connects).await;

    server.pool.shutdown().await.expect("shutdown");
    assert_eq!(
        next(&mut server.disconnects).await,
        (inbound_addr, "pool_shutdown")
    );
    assert_eq!(server.pool.size().await.expect("size"), 0);
    assert_eq!(server.pool.local_addr().await.expect("pool open"), None);

    let addr = serve(&server.pool).await.to_string();
    let pool = server.pool.clone();
    eventually(|| {
        let pool = pool.clone();
        async move { pool.local_addr().await.ok().flatten().is_some() }
    })
    .await;
    client.pool.connect(&addr).await.expect("reconnect");
    next(&mut server.connects).await;
    assert_eq!(server.pool.size().await.expect("size"), 1);

    server.pool.close().await;
    assert!(server.pool.is_closed());
    assert!(matches!(server.pool.size().await, Err(PoolError::Closed)));
}

#[tokio::test]
async fn silent_peers_are_swept() {
    let mut server = harness(local_config());
    let addr = serve(&server.pool).await;
    let _raw = TcpStream::connect(addr).await.expect("connect");
    let (inbound_addr, _) = next(&mut server.connects).await;

    assert_eq!(
        server
            .pool
            .clear_stale_connections(Duration::from_secs(60), DisconnectReason::Stale)
            .await
            .expect("sweep"),
        0
    );
    sleep(Duration::from_millis(20)).await;
    assert_eq!(
        server
            .pool
            .clear_stale_connections(Duration::from_millis(10), DisconnectReason::Stale)
            .await
            .expect("sweep"),
        1
    );
    assert_eq!(next(&mut server.disconnects).await, (inbound_addr, "stale"));
}
