//! Typed error kinds for the transport, registration and supervisor layers (§7).
//!
//! The dispatcher (C5) deliberately has no error type of its own: a pattern-match failure there
//! is caught at the call site and turned into an empty `IncomingResult`, never propagated.

use thiserror::Error;

/// Errors from opening or operating a connection's byte channel (C2).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("connection closed by peer")]
    Eof,
}

/// Errors from the registration handshake (C4).
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("no more alternate nicks to try")]
    NoMoreNicks,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from a supervisor refresh cycle (C7). Any occurrence aborts the in-flight
/// `reconnect_all` call and leaves the previous connection map untouched.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("account store error: {0}")]
    Store(String),
}
