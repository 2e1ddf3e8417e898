//! The `waitForOK` registration handshake (C4, §4.4): optional opportunistic TLS upgrade, send
//! USER/NICK, consume replies until `001` or exhaustion of alternate nicks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use irc_common::{ChanName, Identity, Key, Server, TlsMode};
use irc_wire::IrcMsg;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::Gateway;
use crate::connection::Connection;
use crate::errors::RegistrationError;
use crate::message::Message;
use crate::transport::Transport;

/// A connection that has just reached `001` and is ready for its reader task to be spawned.
pub struct Registered {
    pub connection: Arc<Connection>,
    /// Messages the FSM already classified (NOTICE / other) before `001`, in receive order.
    /// `connect_and_register` callers push these through the hub before starting the live reader
    /// so subscribers don't miss anything that happened during the handshake.
    pub backlog: Vec<(Instant, Message)>,
    pub reader: crate::transport::TransportReader,
    /// The connection's debug log stream (§7); the supervisor wires this to whatever inspection
    /// surface is in use, or drops it if none is attached.
    pub debug_rx: mpsc::UnboundedReceiver<irc_common::DebugEntry>,
}

enum State {
    WaitForOk(VecDeque<String>),
    Ok,
    Cancel,
}

/// Drive a fresh socket from `Connect` through registration. On success the connection's status
/// is `Established` and the starting channel set has already been sent as JOINs.
///
/// Only the initial TCP/TLS connect is retried here, up to `cfg`'s backoff applied between
/// attempts (modelled on `libtiny_client`'s `'connect` loop, which waits `RECONNECT_SECS` after a
/// failed `Stream::new_tcp`/`new_tls` before looping). A failure once the socket is open —
/// registration timing out, a nick collision with no alternates, a read error mid-handshake — is
/// not retried here; it's surfaced to the caller, per §7 ("Transport errors during registration
/// [...] connect returns 'no connection'"). Re-attempting those is the supervisor's call on its
/// next refresh cycle, not this function's.
pub async fn connect_and_register(
    server: &Server,
    identity: &Identity,
    channels: HashMap<ChanName, Option<Key>>,
    cfg: &Gateway,
) -> Result<Registered, RegistrationError> {
    let mut transport = connect_with_retry(server, cfg.connect_attempts.max(1), cfg).await?;

    let mut replay: VecDeque<IrcMsg> = VecDeque::new();
    if server.tls == TlsMode::Opportunistic {
        let (upgraded, pending) = negotiate_opportunistic_tls(transport, &server.host).await?;
        transport = upgraded;
        replay = pending;
    }

    transport
        .write(&IrcMsg::new("NICK", vec![identity.nick.clone()], ""))
        .await?;
    transport
        .write(&IrcMsg::new(
            "USER",
            vec![identity.user_name.clone(), "0".to_string(), "*".to_string()],
            identity.real_name.clone(),
        ))
        .await?;

    let mut current_nick = identity.nick.clone();
    let mut state = State::WaitForOk(identity.nick_alt.iter().cloned().collect());
    let mut backlog: Vec<(Instant, Message)> = Vec::new();

    loop {
        let msg = match replay.pop_front() {
            Some(msg) => msg,
            None => match transport.read_line().await? {
                Ok(msg) => msg,
                Err(parse_err) => {
                    log::warn!("registration: parse error: {parse_err}");
                    continue;
                }
            },
        };

        match msg.cmd.as_str() {
            "001" => {
                state = State::Ok;
                break;
            }
            "433" | "436" => match &mut state {
                State::WaitForOk(alts) => match alts.pop_front() {
                    None => {
                        let _ = transport.write(&IrcMsg::new("QUIT", vec![], "")).await;
                        state = State::Cancel;
                        return Err(RegistrationError::NoMoreNicks);
                    }
                    Some(alt) => {
                        current_nick = alt.clone();
                        transport.write(&IrcMsg::new("NICK", vec![alt], "")).await?;
                    }
                },
                _ => {}
            },
            "NOTICE" => {
                let from = match &msg.prefix {
                    Some(irc_wire::Prefix::User(u)) => Some(crate::message::Who {
                        nick: u.nick.clone(),
                        user: u.user.clone(),
                        host: u.host.clone(),
                    }),
                    _ => None,
                };
                let to = msg.params.first().cloned().unwrap_or_default();
                backlog.push((
                    Instant::now(),
                    Message::NoticeMsg {
                        from,
                        to,
                        text: msg.trail.clone(),
                    },
                ));
            }
            _ => {
                backlog.push((
                    Instant::now(),
                    Message::RawMsg {
                        prefix: msg.prefix.as_ref().map(|p| match p {
                            irc_wire::Prefix::Server(s) => s.clone(),
                            irc_wire::Prefix::User(u) => u.nick.clone(),
                        }),
                        cmd: msg.cmd.clone(),
                        params: msg.params.clone(),
                        trail: msg.trail.clone(),
                    },
                ));
            }
        }
    }

    debug_assert!(matches!(state, State::Ok));

    let (reader, writer) = transport.into_split();
    let (debug_tx, debug_rx) = mpsc::unbounded_channel();
    let connection = Arc::new(Connection::new(writer, current_nick, channels, debug_tx));
    connection.mark_established();

    for (chan, key) in connection.channels() {
        connection
            .send(IrcMsg::new("JOIN", join_params(chan.display(), key.as_deref()), ""))
            .await;
    }

    Ok(Registered {
        connection,
        backlog,
        reader,
        debug_rx,
    })
}

/// Open `server`, retrying a failed connect up to `max_attempts` times with `cfg`'s reconnect
/// backoff between attempts. Only the last attempt's error is returned.
async fn connect_with_retry(
    server: &Server,
    max_attempts: u32,
    cfg: &Gateway,
) -> Result<Transport, RegistrationError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match Transport::connect(server).await {
            Ok(transport) => return Ok(transport),
            Err(e) if attempt < max_attempts => {
                log::warn!(
                    "registration: connect attempt {attempt}/{max_attempts} to {}:{} failed: {e}",
                    server.host,
                    server.port
                );
                sleep(Duration::from_secs(cfg.reconnect_backoff_secs)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Build the JOIN params for rejoining `chan`, carrying its key forward verbatim if it had one
/// (§9 Open Question: "must keys be re-sent verbatim? Assume yes").
fn join_params(chan: &str, key: Option<&str>) -> Vec<String> {
    let mut params = vec![chan.to_string()];
    if let Some(key) = key {
        params.push(key.to_string());
    }
    params
}

/// Attempt a STARTTLS-equivalent upgrade before registration: ask the server to switch to TLS
/// (`STARTTLS`), and if it confirms (`670`), perform the handshake. Any message read while
/// waiting for that confirmation that isn't the confirmation itself is preserved and replayed
/// to the FSM afterward (§4.4 replay buffer), rather than discarded.
async fn negotiate_opportunistic_tls(
    mut transport: Transport,
    host: &str,
) -> Result<(Transport, VecDeque<IrcMsg>), RegistrationError> {
    transport
        .write(&IrcMsg::new("STARTTLS", vec![], ""))
        .await?;

    let mut replay = VecDeque::new();
    loop {
        match transport.read_line().await? {
            Ok(msg) if msg.cmd == "670" => {
                let upgraded = transport.upgrade_tls(host).await?;
                return Ok((upgraded, replay));
            }
            Ok(msg) if msg.cmd == "691" => {
                // Server declined; proceed unencrypted with whatever was already read.
                return Ok((transport, replay));
            }
            Ok(msg) => replay.push_back(msg),
            Err(parse_err) => log::warn!("registration: parse error pre-TLS: {parse_err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_channels_are_passed_through_unchanged() {
        let mut channels = HashMap::new();
        channels.insert(ChanName::new("#a".to_string()), None);
        assert_eq!(channels.len(), 1);
    }

    #[test]
    fn join_params_carries_key_forward() {
        assert_eq!(join_params("#a", Some("hunter2")), vec!["#a", "hunter2"]);
        assert_eq!(join_params("#a", None), vec!["#a"]);
    }
}
