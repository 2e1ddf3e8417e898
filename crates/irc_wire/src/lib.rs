//! IRC wire protocol message parsers and generators (RFC 1459 / 2812, section 2.3.1).
//!
//! This is a lenient parser for a client-side engine: unknown commands are kept as their raw
//! command token, a missing trailing parameter becomes an empty string, and a missing prefix
//! becomes `None`. It does not attempt to validate message semantics; that's `irc_gateway`'s job.

use std::fmt;
use thiserror::Error;

static CRLF: [u8; 2] = [b'\r', b'\n'];

/// The sender of a message, RFC 2812 section 2.3.1 `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefix {
    /// `nickname [ "!" user ] [ "@" host ]`
    User(UserInfo),
    /// `servername`
    Server(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

/// A parsed IRC message: `[ ":" prefix SPACE ] command [ params ] crlf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMsg {
    pub prefix: Option<Prefix>,
    /// Command name or three-digit numeric reply, kept as the raw token.
    pub cmd: String,
    /// "Middle" parameters, in order.
    pub params: Vec<String>,
    /// Trailing parameter. Empty when the message had none (§4.1: "missing trail yields empty
    /// bytes"), which is also how an explicitly empty trailing parameter (`:` followed by
    /// nothing) is represented — callers that need to tell the two apart don't exist in this
    /// protocol subset.
    pub trail: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("parse error at offset {offset}: {reason}")]
pub struct ParseError {
    pub offset: usize,
    pub reason: String,
}

impl ParseError {
    fn new(offset: usize, reason: impl Into<String>) -> Self {
        ParseError {
            offset,
            reason: reason.into(),
        }
    }
}

impl IrcMsg {
    pub fn new(cmd: impl Into<String>, params: Vec<String>, trail: impl Into<String>) -> Self {
        IrcMsg {
            prefix: None,
            cmd: cmd.into(),
            params,
            trail: trail.into(),
        }
    }

    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Is this message's prefix the current user (by nick)?
    pub fn prefix_is_nick(&self, nick: &str) -> bool {
        matches!(&self.prefix, Some(Prefix::User(u)) if u.nick == nick)
    }
}

/// Serialize a message to wire bytes, including the trailing CRLF.
///
/// Emits exactly `[":" prefix " "] cmd (" " param)* [" :" trail] CRLF`.
pub fn serialize(msg: &IrcMsg) -> String {
    let mut out = String::new();
    if let Some(prefix) = &msg.prefix {
        out.push(':');
        match prefix {
            Prefix::Server(name) => out.push_str(name),
            Prefix::User(info) => {
                out.push_str(&info.nick);
                if let Some(user) = &info.user {
                    out.push('!');
                    out.push_str(user);
                }
                if let Some(host) = &info.host {
                    out.push('@');
                    out.push_str(host);
                }
            }
        }
        out.push(' ');
    }
    out.push_str(&msg.cmd);
    for param in &msg.params {
        out.push(' ');
        out.push_str(param);
    }
    if !msg.trail.is_empty() {
        out.push_str(" :");
        out.push_str(&msg.trail);
    }
    out.push_str("\r\n");
    out
}

/// Parse a single, complete line (without the CRLF/LF suffix).
pub fn parse_line(mut line: &str) -> Result<IrcMsg, ParseError> {
    let original_len = line.len();
    let offset = |remaining: &str| original_len - remaining.len();

    let prefix = if let Some(rest) = line.strip_prefix(':') {
        let sp = rest
            .find(' ')
            .ok_or_else(|| ParseError::new(offset(rest), "prefix not terminated by space"))?;
        let pfx_str = &rest[..sp];
        line = &rest[sp + 1..];
        Some(parse_prefix(pfx_str))
    } else {
        None
    };

    let line = line.trim_start_matches(' ');
    let (cmd, rest) = match line.find(' ') {
        Some(sp) => (&line[..sp], &line[sp + 1..]),
        None => (line, ""),
    };
    if cmd.is_empty() {
        return Err(ParseError::new(offset(line), "missing command token"));
    }

    let (params, trail) = parse_params(rest);

    Ok(IrcMsg {
        prefix,
        cmd: cmd.to_string(),
        params,
        trail,
    })
}

fn parse_prefix(pfx: &str) -> Prefix {
    match pfx.find('!') {
        Some(bang) => {
            let nick = pfx[..bang].to_string();
            let rest = &pfx[bang + 1..];
            match rest.find('@') {
                Some(at) => Prefix::User(UserInfo {
                    nick,
                    user: Some(rest[..at].to_string()),
                    host: Some(rest[at + 1..].to_string()),
                }),
                None => Prefix::User(UserInfo {
                    nick,
                    user: Some(rest.to_string()),
                    host: None,
                }),
            }
        }
        None => match pfx.find('@') {
            Some(at) => Prefix::User(UserInfo {
                nick: pfx[..at].to_string(),
                user: None,
                host: Some(pfx[at + 1..].to_string()),
            }),
            // Nicks can't contain '.'; anything with a dot and no '!'/'@' is a server name.
            None if pfx.contains('.') => Prefix::Server(pfx.to_string()),
            None => Prefix::User(UserInfo {
                nick: pfx.to_string(),
                user: None,
                host: None,
            }),
        },
    }
}

/// `params = *14( SPACE middle ) [ SPACE ":" trailing ] =/ 14( SPACE middle ) [ SPACE [":"] trailing ]`
fn parse_params(chrs: &str) -> (Vec<String>, String) {
    let mut params = Vec::new();
    let mut char_indices = chrs.char_indices();

    while let Some((idx, c)) = char_indices.next() {
        if c == ':' {
            return (params, chrs[idx + 1..].to_string());
        }
        if params.len() == 14 {
            return (params, chrs[idx..].to_string());
        }
        if c == ' ' {
            continue;
        }
        loop {
            match char_indices.next() {
                Some((idx_, c)) => {
                    if c == ' ' {
                        params.push(chrs[idx..idx_].to_string());
                        break;
                    }
                }
                None => {
                    params.push(chrs[idx..].to_string());
                    return (params, String::new());
                }
            }
        }
    }

    (params, String::new())
}

/// Drain a single framed message from `buf`, tolerating bare LF as well as CRLF. Returns `None`
/// when no complete line is buffered yet. The matched bytes (including the separator) are always
/// removed from `buf`, even on parse failure, so callers can keep draining.
pub fn parse_buf(buf: &mut Vec<u8>) -> Option<Result<IrcMsg, ParseError>> {
    let (line_end, sep_len) = match buf.windows(2).position(|w| w == CRLF) {
        Some(i) => (i, 2),
        None => match buf.iter().position(|&b| b == b'\n') {
            Some(i) => (i, 1),
            None => return None,
        },
    };

    let line = String::from_utf8_lossy(&buf[..line_end]).into_owned();
    let line = line.trim_end_matches('\r');
    let result = if line.is_empty() {
        // Empty messages (bare CRLF) are silently ignored per RFC 2812 2.3.1.
        buf.drain(0..line_end + sep_len);
        return parse_buf(buf);
    } else {
        parse_line(line)
    };
    buf.drain(0..line_end + sep_len);
    Some(result)
}

impl fmt::Display for IrcMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serialize(self).trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping() {
        let msg = parse_line("PING :irc.example.org").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.cmd, "PING");
        assert!(msg.params.is_empty());
        assert_eq!(msg.trail, "irc.example.org");
    }

    #[test]
    fn parses_user_prefix() {
        let msg = parse_line(":bob!~b@h PART #a").unwrap();
        assert_eq!(
            msg.prefix,
            Some(Prefix::User(UserInfo {
                nick: "bob".to_string(),
                user: Some("~b".to_string()),
                host: Some("h".to_string()),
            }))
        );
        assert_eq!(msg.cmd, "PART");
        assert_eq!(msg.params, vec!["#a".to_string()]);
        assert_eq!(msg.trail, "");
    }

    #[test]
    fn parses_server_prefix() {
        // A bare token with no `!`/`@`/`.` is ambiguous with a nick, so `parse_prefix` only
        // classifies a prefix as `Prefix::Server` when it contains a dot (nicks can't).
        let msg = parse_line(":irc.example.org 315 bob :End of WHO").unwrap();
        assert_eq!(
            msg.prefix,
            Some(Prefix::Server("irc.example.org".to_string()))
        );
        assert_eq!(msg.cmd, "315");
        assert_eq!(msg.params, vec!["bob".to_string()]);
        assert_eq!(msg.trail, "End of WHO");
    }

    #[test]
    fn missing_command_is_an_error() {
        let err = parse_line(":srv").unwrap_err();
        assert!(err.reason.contains("prefix not terminated"));
    }

    #[test]
    fn missing_trail_is_empty_not_absent() {
        let msg = parse_line("JOIN #a,#b").unwrap();
        assert_eq!(msg.trail, "");
        assert_eq!(msg.params, vec!["#a,#b".to_string()]);
    }

    #[test]
    fn serialize_roundtrips_basic_message() {
        let msg = IrcMsg::new("PONG", vec![], "irc.example.org");
        assert_eq!(serialize(&msg), "PONG :irc.example.org\r\n");
    }

    #[test]
    fn serialize_roundtrips_prefixed_message() {
        let msg = IrcMsg::new("PART", vec!["#a".to_string()], "").with_prefix(Prefix::User(
            UserInfo {
                nick: "bob".to_string(),
                user: Some("~b".to_string()),
                host: Some("h".to_string()),
            },
        ));
        assert_eq!(serialize(&msg), ":bob!~b@h PART #a\r\n");
    }

    #[test]
    fn parse_buf_tolerates_lf_only() {
        let mut buf = b"PING :x\n".to_vec();
        let msg = parse_buf(&mut buf).unwrap().unwrap();
        assert_eq!(msg.cmd, "PING");
        assert!(buf.is_empty());
    }

    #[test]
    fn parse_buf_skips_empty_lines() {
        let mut buf = b"\r\nPING :x\r\n".to_vec();
        let msg = parse_buf(&mut buf).unwrap().unwrap();
        assert_eq!(msg.cmd, "PING");
    }

    #[test]
    fn parse_buf_returns_none_without_full_line() {
        let mut buf = b"PING :x".to_vec();
        assert!(parse_buf(&mut buf).is_none());
        assert_eq!(buf, b"PING :x");
    }

    #[test]
    fn unknown_command_is_preserved_verbatim() {
        let msg = parse_line(":srv WHOIS bob").unwrap();
        assert_eq!(msg.cmd, "WHOIS");
        assert_eq!(msg.params, vec!["bob".to_string()]);
    }
}
