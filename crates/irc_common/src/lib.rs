//! Types shared by the wire codec, the connection engine and the supervisor.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// Channel names according to RFC 2812, section 1.3. Channel names are case insensitive, so this
/// type defines `Eq` and `Hash` that work in a case-insensitive way. `ChanName::display` shows the
/// channel name with the original casing.
#[derive(Debug, Clone)]
pub struct ChanName(String);

/// Borrowed version of `ChanName`.
#[derive(Debug)]
pub struct ChanNameRef(str);

impl Deref for ChanName {
    type Target = ChanNameRef;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl AsRef<ChanNameRef> for ChanName {
    fn as_ref(&self) -> &ChanNameRef {
        ChanNameRef::new(self.0.as_ref())
    }
}

impl Borrow<ChanNameRef> for ChanName {
    fn borrow(&self) -> &ChanNameRef {
        self.as_ref()
    }
}

// Used to normalize channel names. Rules are:
//
// - ASCII characters are mapped to their lowercase versions.
// - '[', ']', '\\', '~' are mapped to '{', '}', '|', '^' respectively (RFC 2812 section 2.2).
// - Non-ASCII characters are left unchanged.
fn to_lower(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c.to_ascii_lowercase(),
    }
}

impl ChanName {
    pub fn new(name: String) -> Self {
        ChanName(name)
    }

    pub fn display(&self) -> &str {
        &self.0
    }
}

impl ChanNameRef {
    pub fn new(name: &str) -> &Self {
        unsafe { &*(name as *const str as *const ChanNameRef) }
    }

    pub fn display(&self) -> &str {
        &self.0
    }

    pub fn normalized(&self) -> String {
        self.0.chars().map(to_lower).collect()
    }
}

impl ToOwned for ChanNameRef {
    type Owned = ChanName;

    fn to_owned(&self) -> Self::Owned {
        ChanName(self.0.to_owned())
    }
}

impl PartialEq for ChanName {
    fn eq(&self, other: &Self) -> bool {
        let a: &ChanNameRef = self.borrow();
        let b: &ChanNameRef = other.borrow();
        a.eq(b)
    }
}

impl Eq for ChanName {}

impl PartialEq<ChanNameRef> for ChanName {
    fn eq(&self, other: &ChanNameRef) -> bool {
        let a: &ChanNameRef = self.borrow();
        a.eq(other)
    }
}

impl Hash for ChanName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let a: &ChanNameRef = self.borrow();
        a.hash(state)
    }
}

impl PartialEq for ChanNameRef {
    fn eq(&self, other: &Self) -> bool {
        if self.0.as_bytes().len() != other.0.as_bytes().len() {
            return false;
        }
        self.0
            .chars()
            .map(to_lower)
            .zip(other.0.chars().map(to_lower))
            .all(|(a, b)| a == b)
    }
}

impl Eq for ChanNameRef {}

impl PartialEq<ChanName> for ChanNameRef {
    fn eq(&self, other: &ChanName) -> bool {
        let b: &ChanNameRef = other.borrow();
        self.eq(b)
    }
}

impl Hash for ChanNameRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for c in self.0.chars() {
            to_lower(c).hash(state);
        }
    }
}

/// The optional join key that accompanies a channel in a connection's channel map.
pub type Key = String;

/// How a connection's transport should be secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TlsMode {
    /// Plain, unencrypted socket.
    None,
    /// Start plain; upgrade to TLS if the server asks for it mid-registration.
    Opportunistic,
    /// Perform the TLS handshake before sending anything else.
    Required,
}

/// Address of an IRC network server.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
}

/// The nick/user identity presented during registration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Identity {
    pub nick: String,
    /// Priority-ordered list of fallback nicks, consumed left-to-right on collision.
    pub nick_alt: Vec<String>,
    pub user_name: String,
    pub real_name: String,
}

impl Identity {
    pub fn nicks(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.nick.as_str()).chain(self.nick_alt.iter().map(String::as_str))
    }
}

/// Opaque account identifier, compared for equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AccountId(pub u64);

/// Opaque network identifier, compared for equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NetworkId(pub u64);

/// Severity of a debug-log entry surfaced by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single entry on a connection's debug queue (§7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DebugEntry {
    pub severity: Severity,
    /// Where in the engine this was raised, e.g. "registration", "dispatch", "transport".
    pub location: &'static str,
    pub message: String,
}

impl DebugEntry {
    pub fn new(severity: Severity, location: &'static str, message: impl Into<String>) -> Self {
        DebugEntry {
            severity,
            location,
            message: message.into(),
        }
    }

    pub fn error(location: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, location, message)
    }

    pub fn warning(location: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, location, message)
    }

    pub fn info(location: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, location, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chan_name_case_insensitive_eq() {
        let a = ChanName::new("#Foo".to_string());
        let b = ChanName::new("#foo".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn chan_name_normalizes_rfc2812_specials() {
        let a = ChanNameRef::new("#a[b]");
        assert_eq!(a.normalized(), "#a{b}");
    }

    #[test]
    fn identity_nicks_iterates_primary_then_alts() {
        let id = Identity {
            nick: "alice".into(),
            nick_alt: vec!["alice_".into(), "alice__".into()],
            user_name: "alice".into(),
            real_name: "Alice".into(),
        };
        let nicks: Vec<&str> = id.nicks().collect();
        assert_eq!(nicks, vec!["alice", "alice_", "alice__"]);
    }
}
