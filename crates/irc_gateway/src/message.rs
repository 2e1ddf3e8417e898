//! The structured message stream a connection's broadcast hub fans out to subscribers.
//!
//! Variant order is part of the wire contract with frontend subscribers (§6): new message kinds
//! are appended, existing ones never reordered or removed, so a numeric tag assigned by a
//! serialization framework downstream stays stable across releases.

use irc_wire::UserInfo;
use serde::{Deserialize, Serialize};

/// Who sent something, when known. Narrower than `irc_wire::Prefix`: a `Message` payload only
/// ever needs to say "a user did X", never "a server did X".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Who {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl From<UserInfo> for Who {
    fn from(u: UserInfo) -> Self {
        Who {
            nick: u.nick,
            user: u.user,
            host: u.host,
        }
    }
}

/// A NAMREPLY occupant's channel privilege, parsed from the leading `@`/`+`/`~`/`&`/`%` glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Userflag {
    /// `~`
    Owner,
    /// `&`
    Admin,
    /// `@`
    Op,
    /// `%`
    Halfop,
    /// `+`
    Voice,
}

impl Userflag {
    /// Split a NAMREPLY nick token into its flag glyph (if any) and bare nick.
    pub fn parse(token: &str) -> (Option<Userflag>, &str) {
        let flag = match token.chars().next() {
            Some('~') => Some(Userflag::Owner),
            Some('&') => Some(Userflag::Admin),
            Some('@') => Some(Userflag::Op),
            Some('%') => Some(Userflag::Halfop),
            Some('+') => Some(Userflag::Voice),
            _ => None,
        };
        match flag {
            Some(_) => (flag, &token[1..]),
            None => (None, token),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    PrivMsg {
        from: Who,
        to: String,
        text: String,
    },
    NoticeMsg {
        from: Option<Who>,
        to: String,
        text: String,
    },
    JoinMsg {
        chan: String,
        who: Option<Who>,
    },
    PartMsg {
        chan: String,
        who: Option<Who>,
    },
    KickMsg {
        chan: String,
        nick: Option<String>,
        reason: Option<String>,
    },
    QuitMsg {
        who: Option<Who>,
        reason: Option<String>,
    },
    MOTDMsg {
        text: String,
    },
    TopicMsg {
        chan: String,
        topic: Option<String>,
    },
    NickMsg {
        old: Option<Who>,
        new_nick: String,
    },
    NamreplyMsg {
        chan: String,
        nicks: Vec<(String, Option<Userflag>)>,
    },
    ErrorMsg {
        cmd: String,
    },
    RawMsg {
        prefix: Option<String>,
        cmd: String,
        params: Vec<String>,
        trail: String,
    },
}

/// Serialize a `Message` for frontend consumption (§6: "serialized structured form"). The crate
/// that actually speaks to frontends (the protobuf RPC surface, §1) is out of scope; this is the
/// JSON-shaped representation used by the in-tree debug/inspection surfaces and tests.
pub fn to_json(msg: &Message) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn userflag_parses_each_glyph() {
        assert_eq!(Userflag::parse("@bob"), (Some(Userflag::Op), "bob"));
        assert_eq!(Userflag::parse("+bob"), (Some(Userflag::Voice), "bob"));
        assert_eq!(Userflag::parse("bob"), (None, "bob"));
    }

    #[test]
    fn join_msg_round_trips_through_json() {
        let msg = Message::JoinMsg {
            chan: "#a".to_string(),
            who: Some(Who {
                nick: "carol".to_string(),
                user: Some("c".to_string()),
                host: Some("h".to_string()),
            }),
        };
        let json = to_json(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
