//! Integration coverage for the registration FSM (C4) and the broadcast hub (C6) against a real
//! loopback socket, since both depend on interleaved async I/O that a pure unit test can't
//! exercise.
//!
//! The mock server here is modelled on the retrieval pack's `MockIrcServer` pattern
//! (`TcpListener::bind("127.0.0.1:0")` plus a spawned per-connection handler task) rather than an
//! in-memory `tokio::io::duplex`, since `irc_gateway::transport::Transport` is built directly over
//! `TcpStream`/`TlsStream` rather than a generic `AsyncRead + AsyncWrite`.

use std::collections::HashMap;
use std::time::Duration;

use irc_common::{ChanName, Identity, Key, Server, TlsMode};
use irc_gateway::config::Gateway;
use irc_gateway::connection::ConnectionStatus;
use irc_gateway::{broadcast::Hub, message::Message, registration::connect_and_register};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// Drives one client connection through: 433 collision -> 001 welcome -> two early JOINs -> a
/// synchronization point -> two late JOINs.
async fn run_mock_server(listener: TcpListener, subscribed_rx: oneshot::Receiver<()>, early_sent_tx: oneshot::Sender<()>) {
    let (socket, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("NICK alice"), "unexpected first line: {line}");
    line.clear();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("USER"), "unexpected second line: {line}");

    write_half
        .write_all(b":srv 433 * alice :Nickname is already in use\r\n")
        .await
        .unwrap();

    line.clear();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line.trim_end(), "NICK alice_");

    write_half
        .write_all(b":srv 001 alice_ :Welcome to IRC\r\n")
        .await
        .unwrap();

    write_half
        .write_all(b":carol!c@h JOIN :#a\r\n")
        .await
        .unwrap();
    write_half
        .write_all(b":carol!c@h JOIN :#b\r\n")
        .await
        .unwrap();
    early_sent_tx.send(()).unwrap();

    subscribed_rx.await.unwrap();

    write_half
        .write_all(b":carol!c@h JOIN :#c\r\n")
        .await
        .unwrap();
    write_half
        .write_all(b":carol!c@h JOIN :#d\r\n")
        .await
        .unwrap();

    // Keep the socket open until the test's assertions complete; dropping it early would close
    // the connection out from under the reader task.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn nick_collision_falls_back_then_late_subscriber_sees_only_post_subscribe_messages() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (subscribed_tx, subscribed_rx) = oneshot::channel();
    let (early_sent_tx, early_sent_rx) = oneshot::channel();
    let server_task = tokio::spawn(run_mock_server(listener, subscribed_rx, early_sent_tx));

    let server = Server {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        tls: TlsMode::None,
    };
    let identity = Identity {
        nick: "alice".to_string(),
        nick_alt: vec!["alice_".to_string()],
        user_name: "alice".to_string(),
        real_name: "Alice".to_string(),
    };
    let channels: HashMap<ChanName, Option<Key>> = HashMap::new();
    let cfg = Gateway::default();

    let registered = timeout(
        Duration::from_secs(5),
        connect_and_register(&server, &identity, channels, &cfg),
    )
    .await
    .expect("registration timed out")
    .expect("registration failed");

    // S2: nick collision fallback leaves the connection established under the alternate nick.
    assert_eq!(registered.connection.status(), ConnectionStatus::Established);
    assert_eq!(registered.connection.current_nick(), "alice_");
    assert!(registered.backlog.is_empty());

    let hub = Hub::spawn(
        registered.connection,
        registered.reader,
        registered.backlog,
        cfg.subscriber_buffer,
        Duration::from_secs(60),
        Duration::from_secs(60),
    );

    // Let the first two (pre-subscription) messages land before attaching a subscriber.
    timeout(Duration::from_secs(5), early_sent_rx)
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (tx, mut rx) = mpsc::channel(8);
    hub.subscribe(tx);
    subscribed_tx.send(()).unwrap();

    // S6: a subscriber attached after M1/M2 sees exactly [M3, M4], in order, no backfill.
    let (_, first) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .expect("expected a message");
    let (_, second) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .expect("expected a message");

    match (first, second) {
        (Message::JoinMsg { chan: c1, .. }, Message::JoinMsg { chan: c2, .. }) => {
            assert_eq!(c1, "#c");
            assert_eq!(c2, "#d");
        }
        other => panic!("unexpected messages: {other:?}"),
    }

    hub.stop(Some("test done".to_string())).await;
    server_task.await.unwrap();
}
