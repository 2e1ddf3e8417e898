//! Single-producer, multi-consumer fan-out for one connection's structured message stream (C6,
//! §4.6). A connection's reader task is the sole producer; any number of subscribers attach and
//! detach independently. Late subscribers see no backfill (§8 S6); a slow subscriber drops
//! messages rather than stalling the reader or other subscribers — `tokio::sync::broadcast`
//! gives us exactly that bounded, drop-oldest-on-lag semantics, so the hub is built directly on
//! top of it instead of a hand-rolled ring buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::connection::{run_reader, Connection};
use crate::message::Message;
use crate::transport::TransportReader;
use std::sync::Arc;

pub type SubscriberId = u64;

/// A connection's broadcast hub: owns the reader task and the subscriber registry.
pub struct Hub {
    connection: Arc<Connection>,
    tx: broadcast::Sender<(Instant, Message)>,
    subscribers: DashMap<SubscriberId, JoinHandle<()>>,
    next_id: AtomicU64,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Spawn the reader task and the pump that forwards its output (plus any registration-time
    /// backlog) into the broadcast channel.
    pub fn spawn(
        connection: Arc<Connection>,
        reader: TransportReader,
        backlog: Vec<(Instant, Message)>,
        buffer: usize,
        ping_interval: std::time::Duration,
        pong_timeout: std::time::Duration,
    ) -> Arc<Hub> {
        let (tx, _initial_rx) = broadcast::channel(buffer.max(1));
        let (msg_tx, mut msg_rx) = mpsc::channel(buffer.max(1));

        let reader_conn = connection.clone();
        let reader_handle = tokio::spawn(async move {
            run_reader(reader_conn, reader, msg_tx, ping_interval, pong_timeout).await;
        });

        let pump_tx = tx.clone();
        let pump_handle = tokio::spawn(async move {
            for item in backlog {
                let _ = pump_tx.send(item);
            }
            while let Some(item) = msg_rx.recv().await {
                let _ = pump_tx.send(item);
            }
        });

        Arc::new(Hub {
            connection,
            tx,
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            reader_handle: Mutex::new(Some(reader_handle)),
            pump_handle: Mutex::new(Some(pump_handle)),
        })
    }

    /// Register `out` to receive every message enqueued from this point on. Returns an id usable
    /// with `unsubscribe`.
    pub fn subscribe(&self, out: mpsc::Sender<(Instant, Message)>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut stream = BroadcastStream::new(self.tx.subscribe());
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(item) => {
                        if out.send(item).await.is_err() {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        log::warn!("broadcast: subscriber lagged, dropped {n} messages");
                    }
                }
            }
        });
        self.subscribers.insert(id, handle);
        id
    }

    /// Safe to call concurrently with delivery; a handler mid-delivery finishes its current send.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if let Some((_, handle)) = self.subscribers.remove(&id) {
            handle.abort();
        }
    }

    /// Send `reason` as QUIT if still open, close the transport, stop the reader and pump tasks
    /// and drop every subscriber. Idempotent.
    pub async fn stop(&self, reason: Option<String>) {
        if self.connection.is_open() {
            self.connection
                .send(irc_wire::IrcMsg::new("QUIT", vec![], reason.unwrap_or_default()))
                .await;
        }
        self.connection.close();

        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.pump_handle.lock().take() {
            handle.abort();
        }
        for entry in self.subscribers.iter() {
            entry.value().abort();
        }
        self.subscribers.clear();
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

// `Hub::subscribe`/`stop` and the late-subscriber ordering guarantee (§8 S6) need a live
// `Connection` driving real async I/O; they're covered by the integration tests in `tests/`
// rather than a unit test here.
