//! Pure mapping from a parsed `IrcMsg` to an `IncomingResult` (C5, §4.5).
//!
//! `dispatch` never reads or writes connection state directly. Where the structural mapping
//! depends on "is the sender me" it returns a `ReqNick`/`ReqUser` continuation instead; the
//! connection runtime resolves those from its nick/user cells at the moment of dispatch and
//! calls the continuation to get the final result.

use std::panic::{self, AssertUnwindSafe};

use irc_wire::{IrcMsg, Prefix, UserInfo};

use crate::message::{Message, Userflag, Who};

/// The outcome of dispatching one `IrcMsg`.
pub enum IncomingResult {
    Done {
        send: Vec<IrcMsg>,
        add: Vec<Message>,
        quit: Option<String>,
    },
    /// Resolved with the connection's current user identity (`nick!user@host`, as far as it's
    /// known) before producing the final result.
    ReqUser(Box<dyn FnOnce(Option<UserInfo>) -> IncomingResult + Send>),
    /// Resolved with the connection's current nick before producing the final result.
    ReqNick(Box<dyn FnOnce(String) -> IncomingResult + Send>),
}

impl IncomingResult {
    fn done(send: Vec<IrcMsg>, add: Vec<Message>, quit: Option<String>) -> Self {
        IncomingResult::Done { send, add, quit }
    }

    fn empty() -> Self {
        IncomingResult::done(vec![], vec![], None)
    }

    fn add_one(msg: Message) -> Self {
        IncomingResult::done(vec![], vec![msg], None)
    }

    fn quit(reason: impl Into<String>) -> Self {
        IncomingResult::done(vec![], vec![], Some(reason.into()))
    }

    fn other(msg: &IrcMsg) -> Self {
        IncomingResult::add_one(Message::RawMsg {
            prefix: msg.prefix.as_ref().map(display_prefix),
            cmd: msg.cmd.clone(),
            params: msg.params.clone(),
            trail: msg.trail.clone(),
        })
    }
}

fn display_prefix(prefix: &Prefix) -> String {
    match prefix {
        Prefix::Server(name) => name.clone(),
        Prefix::User(u) => u.nick.clone(),
    }
}

fn who_from_prefix(prefix: &Option<Prefix>) -> Option<Who> {
    match prefix {
        Some(Prefix::User(u)) => Some(Who {
            nick: u.nick.clone(),
            user: u.user.clone(),
            host: u.host.clone(),
        }),
        _ => None,
    }
}

fn prefix_nick<'a>(prefix: &'a Option<Prefix>) -> Option<&'a str> {
    match prefix {
        Some(Prefix::User(u)) => Some(u.nick.as_str()),
        _ => None,
    }
}

fn opt(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Dispatch one parsed message. Catches panics from the (by-construction infallible) inner
/// mapping and turns them into a no-op result, per §4.5's "pattern-match failures ... never take
/// down the connection".
pub fn dispatch(msg: IrcMsg) -> IncomingResult {
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch_inner(msg))) {
        Ok(result) => result,
        Err(_) => {
            log::warn!("dispatch: pattern-match failure, dropping message");
            IncomingResult::empty()
        }
    }
}

fn dispatch_inner(msg: IrcMsg) -> IncomingResult {
    match msg.cmd.as_str() {
        "PING" => IncomingResult::done(
            vec![IrcMsg::new("PONG", vec![], msg.trail.clone())],
            vec![],
            None,
        ),

        "JOIN" => dispatch_join(msg),
        "PART" => dispatch_part(msg),
        "QUIT" => dispatch_quit(msg),
        "KICK" => dispatch_kick(msg),
        "KILL" => IncomingResult::quit("KILL received"),
        "PRIVMSG" => dispatch_privmsg(msg),
        "NOTICE" => dispatch_notice(msg),
        "NICK" => dispatch_nick(msg),
        "ERROR" => IncomingResult::quit(msg.trail.clone()),

        "375" | "372" => IncomingResult::add_one(Message::MOTDMsg {
            text: msg.trail.clone(),
        }),
        "376" | "366" => IncomingResult::empty(),

        "332" => {
            let chan = msg.params.last().cloned().unwrap_or_default();
            IncomingResult::add_one(Message::TopicMsg {
                chan,
                topic: Some(msg.trail.clone()),
            })
        }
        "331" => {
            let chan = msg.params.last().cloned().unwrap_or_default();
            IncomingResult::add_one(Message::TopicMsg { chan, topic: None })
        }

        "353" => dispatch_namreply(msg),

        "433" | "436" => IncomingResult::add_one(Message::ErrorMsg {
            cmd: msg.cmd.clone(),
        }),

        _ => IncomingResult::other(&msg),
    }
}

fn dispatch_join(msg: IrcMsg) -> IncomingResult {
    if prefix_nick(&msg.prefix).is_none() {
        return IncomingResult::other(&msg);
    }
    let who = who_from_prefix(&msg.prefix);
    let chan_list = if !msg.trail.is_empty() {
        msg.trail.clone()
    } else {
        msg.params.first().cloned().unwrap_or_default()
    };
    IncomingResult::ReqNick(Box::new(move |current_nick| {
        let is_self = who.as_ref().map(|w| w.nick == current_nick).unwrap_or(false);
        let add = chan_list
            .split(',')
            .filter(|c| !c.is_empty())
            .map(|chan| Message::JoinMsg {
                chan: chan.to_string(),
                who: if is_self { None } else { who.clone() },
            })
            .collect();
        IncomingResult::done(vec![], add, None)
    }))
}

fn dispatch_part(msg: IrcMsg) -> IncomingResult {
    if prefix_nick(&msg.prefix).is_none() {
        return IncomingResult::other(&msg);
    }
    let who = who_from_prefix(&msg.prefix);
    let chan_list = msg.params.first().cloned().unwrap_or_default();
    IncomingResult::ReqNick(Box::new(move |current_nick| {
        let is_self = who.as_ref().map(|w| w.nick == current_nick).unwrap_or(false);
        let add = chan_list
            .split(',')
            .filter(|c| !c.is_empty())
            .map(|chan| Message::PartMsg {
                chan: chan.to_string(),
                who: if is_self { None } else { who.clone() },
            })
            .collect();
        IncomingResult::done(vec![], add, None)
    }))
}

fn dispatch_quit(msg: IrcMsg) -> IncomingResult {
    if prefix_nick(&msg.prefix).is_none() {
        return IncomingResult::other(&msg);
    }
    let who = who_from_prefix(&msg.prefix);
    let reason = opt(msg.trail.clone());
    IncomingResult::add_one(Message::QuitMsg { who, reason })
}

fn dispatch_kick(msg: IrcMsg) -> IncomingResult {
    let chan = msg.params.first().cloned().unwrap_or_default();
    let nick = msg.params.get(1).cloned();
    let reason = opt(msg.trail.clone());
    IncomingResult::add_one(Message::KickMsg {
        chan,
        nick,
        reason,
    })
}

fn dispatch_privmsg(msg: IrcMsg) -> IncomingResult {
    let from = match who_from_prefix(&msg.prefix) {
        Some(w) => w,
        None => return IncomingResult::other(&msg),
    };
    let to = msg.params.first().cloned().unwrap_or_default();
    IncomingResult::add_one(Message::PrivMsg {
        from,
        to,
        text: msg.trail.clone(),
    })
}

fn dispatch_notice(msg: IrcMsg) -> IncomingResult {
    let from = who_from_prefix(&msg.prefix);
    let to = msg.params.first().cloned().unwrap_or_default();
    IncomingResult::add_one(Message::NoticeMsg {
        from,
        to,
        text: msg.trail.clone(),
    })
}

fn dispatch_nick(msg: IrcMsg) -> IncomingResult {
    if prefix_nick(&msg.prefix).is_none() {
        return IncomingResult::other(&msg);
    }
    let old = who_from_prefix(&msg.prefix);
    let new_nick = if !msg.trail.is_empty() {
        msg.trail.clone()
    } else {
        msg.params.first().cloned().unwrap_or_default()
    };
    IncomingResult::ReqUser(Box::new(move |_current_user| {
        IncomingResult::add_one(Message::NickMsg { old, new_nick })
    }))
}

fn dispatch_namreply(msg: IrcMsg) -> IncomingResult {
    let chan = msg.params.last().cloned().unwrap_or_default();
    let nicks = msg
        .trail
        .split_whitespace()
        .map(|tok| {
            let (flag, nick) = Userflag::parse(tok);
            (nick.to_string(), flag)
        })
        .collect();
    IncomingResult::add_one(Message::NamreplyMsg { chan, nicks })
}
