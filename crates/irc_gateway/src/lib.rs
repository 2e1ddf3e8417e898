//! The IRC connection engine: transport, registration, dispatch, per-connection state, the
//! broadcast hub and the multi-account supervisor (C2 through C7).
//!
//! `irc_wire` owns the wire grammar; `irc_common` owns the value types shared with external
//! collaborators. This crate wires them into running connections.

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod message;
pub mod registration;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use broadcast::Hub;
pub use connection::{Connection, ConnectionStatus};
pub use dispatch::{dispatch, IncomingResult};
pub use message::{to_json, Message, Userflag, Who};
pub use registration::{connect_and_register, Registered};
pub use supervisor::{new_connection_map, reconnect_all, run_event_loop, ConnectionMap};
