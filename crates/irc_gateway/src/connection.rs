//! Per-connection state: current nick, joined channels, lifecycle status, transport handle,
//! inbound message queue, debug queue (C3, §4.3). Shared across the reader task, writer callers
//! and the broadcast hub via `Arc<Connection>`; each state cell is independently locked so a
//! writer can run while the reader is blocked in `read_line`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use irc_common::{ChanName, DebugEntry, Key};
use irc_wire::{IrcMsg, UserInfo};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::sleep;

use crate::dispatch::{dispatch, IncomingResult};
use crate::message::Message;
use crate::transport::{TransportReader, TransportWriter};

/// §3: transitions are strictly monotonic, `Initializing < Established < Closed`. Re-entry to
/// `Initializing` requires a new `Connection` value produced by reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionStatus {
    Initializing,
    Established,
    Closed,
}

pub struct Connection {
    writer: AsyncMutex<TransportWriter>,
    status: RwLock<ConnectionStatus>,
    nick: RwLock<String>,
    user: RwLock<Option<UserInfo>>,
    channels: RwLock<HashMap<ChanName, Option<Key>>>,
    /// The host part of our own usermask as last reported by RPL_VISIBLEHOST (396), if the
    /// network assigns cloaks (SPEC_FULL §3 usermask tracking).
    visible_host: RwLock<Option<String>>,
    debug_tx: mpsc::UnboundedSender<DebugEntry>,
}

impl Connection {
    pub(crate) fn new(
        writer: TransportWriter,
        nick: String,
        channels: HashMap<ChanName, Option<Key>>,
        debug_tx: mpsc::UnboundedSender<DebugEntry>,
    ) -> Connection {
        Connection {
            writer: AsyncMutex::new(writer),
            status: RwLock::new(ConnectionStatus::Initializing),
            nick: RwLock::new(nick),
            user: RwLock::new(None),
            channels: RwLock::new(channels),
            visible_host: RwLock::new(None),
            debug_tx,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn is_open(&self) -> bool {
        self.status() != ConnectionStatus::Closed
    }

    pub fn is_init(&self) -> bool {
        self.status() == ConnectionStatus::Initializing
    }

    pub fn current_nick(&self) -> String {
        self.nick.read().clone()
    }

    pub fn set_nick(&self, nick: String) {
        *self.nick.write() = nick;
    }

    pub fn current_user(&self) -> Option<UserInfo> {
        self.user.read().clone()
    }

    pub fn set_user(&self, user: UserInfo) {
        *self.user.write() = Some(user);
    }

    pub fn visible_host(&self) -> Option<String> {
        self.visible_host.read().clone()
    }

    pub fn set_visible_host(&self, host: String) {
        *self.visible_host.write() = Some(host);
    }

    pub fn channels(&self) -> HashMap<ChanName, Option<Key>> {
        self.channels.read().clone()
    }

    pub(crate) fn mark_established(&self) {
        let mut status = self.status.write();
        if *status == ConnectionStatus::Initializing {
            *status = ConnectionStatus::Established;
        }
    }

    /// Idempotent: flips status to `Closed` exactly once.
    pub fn close(&self) {
        let mut status = self.status.write();
        if *status != ConnectionStatus::Closed {
            *status = ConnectionStatus::Closed;
            self.push_debug(DebugEntry::info("connection", "closed"));
        }
    }

    /// A send on a closed connection is a silent no-op, logged at error level (§4.3, §9: QUIT
    /// sent unconditionally during teardown must not panic or block).
    pub async fn send(&self, msg: IrcMsg) {
        if !self.is_open() {
            log::error!("send on closed connection: {}", msg.cmd);
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write(&msg).await {
            self.push_debug(DebugEntry::error("transport", e.to_string()));
            drop(writer);
            self.close();
        }
    }

    fn push_debug(&self, entry: DebugEntry) {
        match entry.severity {
            irc_common::Severity::Error => log::error!("[{}] {}", entry.location, entry.message),
            irc_common::Severity::Warning => log::warn!("[{}] {}", entry.location, entry.message),
            irc_common::Severity::Info => log::info!("[{}] {}", entry.location, entry.message),
        }
        let _ = self.debug_tx.send(entry);
    }

    fn join_channel(&self, chan: &str) {
        self.channels
            .write()
            .entry(ChanName::new(chan.to_string()))
            .or_insert(None);
    }

    fn part_channel(&self, chan: &str) {
        self.channels
            .write()
            .remove(irc_common::ChanNameRef::new(chan));
    }

    fn clear_channels(&self) {
        self.channels.write().clear();
    }
}

enum PingState {
    SendPing,
    ExpectPong,
}

/// Drives the connection after registration: reads messages, dispatches them, applies channel
/// map / nick-cell side effects, forwards outgoing replies, and sends a keepalive PING after
/// `ping_interval` idle, closing the connection if no traffic answers within `pong_timeout`
/// (modelled on a two-state pinger, §2.2 of the expanded spec).
pub async fn run_reader(
    conn: Arc<Connection>,
    mut reader: TransportReader,
    msg_tx: mpsc::Sender<(Instant, Message)>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping_state = PingState::SendPing;

    loop {
        let timeout = match ping_state {
            PingState::SendPing => ping_interval,
            PingState::ExpectPong => pong_timeout,
        };

        tokio::select! {
            result = reader.read_line() => {
                match result {
                    Ok(Ok(msg)) => {
                        ping_state = PingState::SendPing;
                        if !handle_incoming(&conn, msg, &msg_tx).await {
                            break;
                        }
                    }
                    Ok(Err(parse_err)) => {
                        conn.push_debug(DebugEntry::warning("wire", parse_err.to_string()));
                    }
                    Err(transport_err) => {
                        conn.push_debug(DebugEntry::error("transport", transport_err.to_string()));
                        conn.close();
                        break;
                    }
                }
            }
            _ = sleep(timeout) => {
                match ping_state {
                    PingState::SendPing => {
                        conn.send(IrcMsg::new("PING", vec![], "keepalive")).await;
                        ping_state = PingState::ExpectPong;
                    }
                    PingState::ExpectPong => {
                        conn.push_debug(DebugEntry::warning("keepalive", "pong timeout"));
                        conn.close();
                        break;
                    }
                }
            }
        }
    }
}

/// Dispatch one inbound message, apply its runtime side effects (channel map / nick cell) and
/// forward outgoing replies. Returns `false` when the connection should stop reading.
async fn handle_incoming(
    conn: &Arc<Connection>,
    msg: IrcMsg,
    msg_tx: &mpsc::Sender<(Instant, Message)>,
) -> bool {
    let cmd = msg.cmd.clone();
    let prefix_nick = match &msg.prefix {
        Some(irc_wire::Prefix::User(u)) => Some(u.nick.clone()),
        _ => None,
    };
    let new_nick_for_self = if cmd == "NICK" {
        if !msg.trail.is_empty() {
            Some(msg.trail.clone())
        } else {
            msg.params.first().cloned()
        }
    } else {
        None
    };
    // Usermask tracking (SPEC_FULL §3): a self-JOIN's prefix is the fullest `nick!user@host` the
    // server ever echoes back unprompted, and 396 (RPL_VISIBLEHOST) updates the host part when a
    // cloak is assigned after registration.
    let self_join_usermask = if cmd == "JOIN" {
        match &msg.prefix {
            Some(irc_wire::Prefix::User(u)) if u.nick == conn.current_nick() => Some(u.clone()),
            _ => None,
        }
    } else {
        None
    };
    let visible_host = if cmd == "396" {
        msg.params.get(1).cloned()
    } else {
        None
    };

    let result = resolve(conn, dispatch(msg));

    let (send, add, quit) = match result {
        IncomingResult::Done { send, add, quit } => (send, add, quit),
        _ => (vec![], vec![], None),
    };

    let now = Instant::now();
    for out in send {
        conn.send(out).await;
    }
    for message in &add {
        apply_side_effects(conn, message);
    }
    if cmd == "NICK" {
        if let (Some(from), Some(new_nick)) = (prefix_nick, new_nick_for_self) {
            if from == conn.current_nick() {
                conn.set_nick(new_nick);
            }
        }
    }
    if let Some(user) = self_join_usermask {
        conn.set_user(user);
    }
    if let Some(host) = visible_host {
        conn.set_visible_host(host);
    }
    for message in add {
        if msg_tx.send((now, message)).await.is_err() {
            // The broadcast hub has gone away; nothing left to deliver to.
            return false;
        }
    }

    if let Some(reason) = quit {
        conn.send(IrcMsg::new("QUIT", vec![], reason)).await;
        conn.close();
        return false;
    }

    true
}

fn apply_side_effects(conn: &Connection, message: &Message) {
    match message {
        Message::JoinMsg { chan, who } if who.is_none() => conn.join_channel(chan),
        Message::PartMsg { chan, who } if who.is_none() => conn.part_channel(chan),
        Message::QuitMsg { who: Some(who), .. } if who.nick == conn.current_nick() => {
            conn.clear_channels()
        }
        Message::KickMsg { chan, nick: Some(nick), .. } if *nick == conn.current_nick() => {
            conn.part_channel(chan)
        }
        _ => {}
    }
}

/// Resolve a dispatcher continuation against the connection's current nick/user cells.
fn resolve(conn: &Connection, result: IncomingResult) -> IncomingResult {
    match result {
        IncomingResult::ReqNick(f) => f(conn.current_nick()),
        IncomingResult::ReqUser(f) => f(conn.current_user()),
        done => done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Who;
    use irc_common::{Server, TlsMode};
    use tokio::net::TcpListener;

    #[test]
    fn status_ordering_is_monotonic() {
        assert!(ConnectionStatus::Initializing < ConnectionStatus::Established);
        assert!(ConnectionStatus::Established < ConnectionStatus::Closed);
    }

    async fn test_connection(nick: &str) -> Arc<Connection> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let server = Server {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            tls: TlsMode::None,
        };
        let transport = crate::transport::Transport::connect(&server).await.unwrap();
        let (_reader, writer) = transport.into_split();

        let mut channels = HashMap::new();
        channels.insert(ChanName::new("#a".to_string()), None);
        channels.insert(ChanName::new("#b".to_string()), None);

        let (debug_tx, _debug_rx) = mpsc::unbounded_channel();
        Arc::new(Connection::new(writer, nick.to_string(), channels, debug_tx))
    }

    #[tokio::test]
    async fn self_quit_clears_all_channels() {
        let conn = test_connection("bob").await;
        assert_eq!(conn.channels().len(), 2);

        apply_side_effects(
            &conn,
            &Message::QuitMsg {
                who: Some(Who {
                    nick: "bob".to_string(),
                    user: Some("~b".to_string()),
                    host: Some("h".to_string()),
                }),
                reason: None,
            },
        );

        assert!(conn.channels().is_empty());
    }

    #[tokio::test]
    async fn third_party_quit_leaves_channels_untouched() {
        let conn = test_connection("bob").await;

        apply_side_effects(
            &conn,
            &Message::QuitMsg {
                who: Some(Who {
                    nick: "carol".to_string(),
                    user: Some("c".to_string()),
                    host: Some("h".to_string()),
                }),
                reason: None,
            },
        );

        assert_eq!(conn.channels().len(), 2);
    }
}
